use std::fmt::{self, Display, Formatter};
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use super::atoms::Atom;
use super::types::{Attributes, Curvature, Shape, Sign};

/// Which kind of leaf a slice refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LeafKind {
    Parameter,
    Variable,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Number(f64),
    Parameter(String),
    Variable(String),
    Add(Node, Node),
    Multiply(Node, Node),
    Negate(Node),
    Transpose(Node),
    /// A contiguous range `[begin, end)` along `dim` (0 for rows, 1 for
    /// columns) of a parameter or a variable.
    Slice {
        inner: Node,
        kind: LeafKind,
        begin: usize,
        end: usize,
        dim: usize,
    },
    ToVector(Node),
    ToMatrix(Node),
    Atom {
        atom: Atom,
        args: Vec<Node>,
    },
    Norm(Vec<Node>),
    Abs(Node),
    Vstack(Vec<Node>),
}

/// An immutable, shareable expression node together with its attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    _e: Rc<Expression>,
    _t: Attributes,
}

impl Node {
    /// Build a node from an expression whose attributes have already been
    /// checked; all other constructors go through the smart constructors of
    /// the `fold` module.
    pub(crate) fn raw(e: Expression, t: Attributes) -> Node {
        Node {
            _e: Rc::new(e),
            _t: t,
        }
    }

    pub fn number(x: f64) -> Node {
        // normalize -0
        let x = if x == 0.0 { 0.0 } else { x };
        Node::raw(
            Expression::Number(x),
            Attributes {
                curvature: Curvature::Constant,
                sign: Sign::of(x),
                shape: Shape::Scalar,
            },
        )
    }
    pub fn zero() -> Node {
        Node::number(0.0)
    }
    pub fn one() -> Node {
        Node::number(1.0)
    }

    pub fn e(&self) -> &Expression {
        &self._e
    }
    pub fn t(&self) -> &Attributes {
        &self._t
    }
    pub fn curvature(&self) -> Curvature {
        self._t.curvature
    }
    pub fn sign(&self) -> Sign {
        self._t.sign
    }
    pub fn shape(&self) -> &Shape {
        &self._t.shape
    }

    pub fn as_number(&self) -> Option<f64> {
        match self.e() {
            Expression::Number(x) => Some(*x),
            _ => None,
        }
    }
    pub fn is_number(&self) -> bool {
        self.as_number().is_some()
    }
    pub fn is_zero(&self) -> bool {
        self.as_number() == Some(0.0)
    }
    pub fn is_one(&self) -> bool {
        self.as_number() == Some(1.0)
    }
    pub fn is_constant(&self) -> bool {
        self.curvature().is_constant()
    }

    /// Strip the casts wrapping a node.
    pub fn uncast(&self) -> &Node {
        match self.e() {
            Expression::ToVector(x) | Expression::ToMatrix(x) => x.uncast(),
            _ => self,
        }
    }

    /// Whether the expression is a single (possibly cast) parameter or
    /// variable, and which.
    pub fn leaf_kind(&self) -> Option<(LeafKind, &str)> {
        match self.uncast().e() {
            Expression::Parameter(n) => Some((LeafKind::Parameter, n.as_str())),
            Expression::Variable(n) => Some((LeafKind::Variable, n.as_str())),
            _ => None,
        }
    }
}

#[buildstructor::buildstructor]
impl Node {
    #[builder(entry = "parameter", exit = "build", visibility = "pub")]
    fn new_parameter(name: String, shape: Option<Shape>, sign: Option<Sign>) -> Node {
        Node::raw(
            Expression::Parameter(name),
            Attributes {
                curvature: Curvature::Constant,
                sign: sign.unwrap_or(Sign::Neither),
                shape: shape.unwrap_or(Shape::Scalar),
            },
        )
    }
    #[builder(entry = "variable", exit = "build", visibility = "pub")]
    fn new_variable(name: String, shape: Option<Shape>) -> Node {
        Node::raw(
            Expression::Variable(name),
            Attributes {
                curvature: Curvature::Affine,
                sign: Sign::Neither,
                shape: shape.unwrap_or(Shape::Scalar),
            },
        )
    }
}

fn fmt_args(args: &[Node]) -> String {
    args.iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn parenthesized(n: &Node) -> String {
    match n.e() {
        Expression::Add(..) => format!("({})", n),
        _ => n.to_string(),
    }
}

impl Display for Node {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.e() {
            Expression::Number(x) => write!(f, "{}", x),
            Expression::Parameter(n) | Expression::Variable(n) => write!(f, "{}", n),
            Expression::Add(l, r) => match r.e() {
                Expression::Negate(r) => write!(f, "{} - {}", l, parenthesized(r)),
                _ => write!(f, "{} + {}", l, r),
            },
            Expression::Multiply(l, r) => {
                write!(f, "{}*{}", parenthesized(l), parenthesized(r))
            }
            Expression::Negate(x) => write!(f, "-{}", parenthesized(x)),
            Expression::Transpose(x) => match x.e() {
                Expression::Add(..) | Expression::Multiply(..) | Expression::Negate(..) => {
                    write!(f, "({})'", x)
                }
                _ => write!(f, "{}'", x),
            },
            Expression::Slice {
                inner,
                begin,
                end,
                dim,
                ..
            } => match (dim, inner.shape()) {
                (0, Shape::Matrix(..)) => write!(f, "{}({}:{}, :)", inner, begin, end),
                (0, _) => write!(f, "{}({}:{})", inner, begin, end),
                _ => write!(f, "{}(:, {}:{})", inner, begin, end),
            },
            Expression::ToVector(x) | Expression::ToMatrix(x) => write!(f, "{}", x),
            Expression::Atom { atom, args } => write!(f, "{}({})", atom, fmt_args(args)),
            Expression::Norm(args) => write!(f, "norm({})", fmt_args(args)),
            Expression::Abs(x) => write!(f, "abs({})", x),
            Expression::Vstack(args) => write!(
                f,
                "[{}]",
                args.iter()
                    .map(|a| a.to_string())
                    .collect::<Vec<_>>()
                    .join("; ")
            ),
        }
    }
}

/// The relational operators a constraint may use; `>=` is only accepted as
/// input and is stored as a swapped `<=`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparison {
    Le,
    Eq,
    Ge,
}
impl Display for Comparison {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Comparison::Le => "<=",
                Comparison::Eq => "==",
                Comparison::Ge => ">=",
            }
        )
    }
}

/// A normalized constraint `lhs <op> 0`, where `lhs` is the residual of the
/// original comparison and `op` is either `<=` or `==`.
#[derive(Debug, Clone, PartialEq)]
pub struct RelOp {
    pub op: Comparison,
    pub lhs: Node,
    pub rhs: Node,
}
impl RelOp {
    pub fn is_dcp(&self) -> bool {
        match self.op {
            Comparison::Eq => self.lhs.curvature().is_affine(),
            Comparison::Le | Comparison::Ge => self.lhs.curvature().is_convex(),
        }
    }
}
impl Display for RelOp {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.lhs, self.op, self.rhs)
    }
}
