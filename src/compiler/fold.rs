//! Smart constructors for expression nodes.
//!
//! Every compound node is built through one of these functions, which
//! normalize the tree as it is built: constants are folded and kept as the
//! leftmost operand, negations are pushed down, and products distribute
//! over sums. Attributes are computed here, so an ill-formed node can not be
//! constructed.
use anyhow::*;

use super::atoms::{self, Atom};
use super::node::{Comparison, Expression, LeafKind, Node, RelOp};
use super::types::{Attributes, Dim, Shape};
use crate::errors::{excerpt, CompileError, Infeasible};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Add,
    Mul,
}
impl Op {
    fn apply(&self, x: f64, y: f64) -> f64 {
        match self {
            Op::Add => x + y,
            Op::Mul => x * y,
        }
    }
    /// If `n` is an application of this operator with a literal left
    /// operand, return the literal and the other operand.
    fn split<'a>(&self, n: &'a Node) -> Option<(f64, &'a Node)> {
        match (self, n.e()) {
            (Op::Add, Expression::Add(l, r)) | (Op::Mul, Expression::Multiply(l, r)) => {
                l.as_number().map(|x| (x, r))
            }
            _ => None,
        }
    }
    fn build(&self, lhs: &Node, rhs: &Node) -> Result<Node> {
        match self {
            Op::Add => add(lhs, rhs),
            Op::Mul => mul(lhs, rhs),
        }
    }
    fn raw(&self, lhs: &Node, rhs: &Node) -> Result<Node> {
        match self {
            Op::Add => make_add(lhs, rhs),
            Op::Mul => make_mul(lhs, rhs),
        }
    }
}

fn make_add(lhs: &Node, rhs: &Node) -> Result<Node> {
    let shape = lhs.shape().add(rhs.shape())?;
    Ok(Node::raw(
        Expression::Add(lhs.clone(), rhs.clone()),
        Attributes {
            curvature: lhs.curvature() + rhs.curvature(),
            sign: lhs.sign() + rhs.sign(),
            shape,
        },
    ))
}

fn make_mul(lhs: &Node, rhs: &Node) -> Result<Node> {
    if !lhs.is_constant() {
        if rhs.is_constant() && rhs.shape().is_scalar() {
            return make_mul(rhs, lhs);
        }
        bail!(CompileError::NonConstantProduct {
            lhs: excerpt(lhs),
            rhs: excerpt(rhs),
        })
    }

    let shape = lhs.shape().mul(rhs.shape())?;
    Ok(Node::raw(
        Expression::Multiply(lhs.clone(), rhs.clone()),
        Attributes {
            curvature: rhs.curvature().scale(lhs.sign()),
            sign: lhs.sign() * rhs.sign(),
            shape,
        },
    ))
}

/// Associative constant folding shared by sums and products; the result
/// carries at most one literal, in leftmost position.
fn constant_folding(op: Op, lhs: &Node, rhs: &Node) -> Result<Node> {
    match (lhs.as_number(), rhs.as_number()) {
        (Some(x), Some(y)) => Ok(Node::number(op.apply(x, y))),
        (Some(x), None) => {
            if let Some((y, r)) = op.split(rhs) {
                op.build(&Node::number(op.apply(x, y)), r)
            } else {
                op.raw(lhs, rhs)
            }
        }
        (None, Some(_)) => constant_folding(op, rhs, lhs),
        (None, None) => match (op.split(lhs), op.split(rhs)) {
            (Some((x, l)), Some((y, r))) => {
                op.build(&Node::number(op.apply(x, y)), &op.build(l, r)?)
            }
            (Some((x, l)), None) => op.build(&Node::number(x), &op.build(l, rhs)?),
            (None, Some((y, r))) => op.build(&Node::number(y), &op.build(lhs, r)?),
            (None, None) => op.raw(lhs, rhs),
        },
    }
}

pub fn constant_folding_add(lhs: &Node, rhs: &Node) -> Result<Node> {
    if lhs.to_string() == rhs.to_string() {
        return mul(&Node::number(2.0), lhs);
    }
    if lhs.is_zero() {
        return Ok(rhs.clone());
    }
    if rhs.is_zero() {
        return Ok(lhs.clone());
    }
    constant_folding(Op::Add, lhs, rhs)
}

pub fn constant_folding_mul(lhs: &Node, rhs: &Node) -> Result<Node> {
    if lhs.is_one() {
        return Ok(rhs.clone());
    }
    if rhs.is_one() {
        return Ok(lhs.clone());
    }
    if lhs.is_zero() || rhs.is_zero() {
        return Ok(Node::zero());
    }
    if lhs.as_number() == Some(-1.0) {
        return Ok(negate(rhs));
    }
    if rhs.as_number() == Some(-1.0) {
        return Ok(negate(lhs));
    }
    constant_folding(Op::Mul, lhs, rhs)
}

/// Products distribute over sums, and negations are pulled out of products.
pub fn distribute(lhs: &Node, rhs: &Node) -> Result<Node> {
    match (lhs.e(), rhs.e()) {
        (_, Expression::Negate(r)) => Ok(negate(&distribute(lhs, r)?)),
        (Expression::Negate(l), _) => Ok(negate(&distribute(l, rhs)?)),
        (_, Expression::Add(x, y)) if lhs.is_constant() && !lhs.is_one() && !lhs.is_zero() => {
            add(&distribute(lhs, x)?, &distribute(lhs, y)?)
        }
        (Expression::Add(x, y), _)
            if rhs.is_constant()
                && rhs.shape().is_scalar()
                && !rhs.is_one()
                && !rhs.is_zero() =>
        {
            add(&distribute(x, rhs)?, &distribute(y, rhs)?)
        }
        _ => constant_folding_mul(lhs, rhs),
    }
}

pub fn add(lhs: &Node, rhs: &Node) -> Result<Node> {
    constant_folding_add(lhs, rhs)
}

pub fn sub(lhs: &Node, rhs: &Node) -> Result<Node> {
    if lhs.to_string() == rhs.to_string() {
        Ok(Node::zero())
    } else {
        add(lhs, &negate(rhs))
    }
}

pub fn mul(lhs: &Node, rhs: &Node) -> Result<Node> {
    distribute(lhs, rhs)
}

pub fn negate(x: &Node) -> Node {
    match x.e() {
        Expression::Negate(inner) => inner.clone(),
        Expression::Number(v) => Node::number(-v),
        Expression::Add(l, r) => Node::raw(Expression::Add(negate(l), negate(r)), x.t().negated()),
        Expression::Multiply(l, r) => {
            Node::raw(Expression::Multiply(negate(l), r.clone()), x.t().negated())
        }
        _ => Node::raw(Expression::Negate(x.clone()), x.t().negated()),
    }
}

pub fn transpose(x: &Node) -> Result<Node> {
    match x.e() {
        _ if x.shape().is_scalar() => Ok(x.clone()),
        Expression::Transpose(inner) => Ok(inner.clone()),
        _ if x.is_constant() => Ok(Node::raw(
            Expression::Transpose(x.clone()),
            Attributes {
                shape: x.shape().transpose(),
                ..x.t().clone()
            },
        )),
        _ => bail!(CompileError::Transpose(excerpt(x))),
    }
}

/// The half-open range `[begin, end)` of `x` along `dim`.
pub fn slice(x: &Node, begin: usize, end: usize, dim: usize) -> Result<Node> {
    let (kind, _) = x.leaf_kind().ok_or_else(|| {
        CompileError::InvalidSlice(
            excerpt(x),
            "only parameters and variables may be sliced".into(),
        )
    })?;
    let inner = x.uncast();
    if begin >= end {
        bail!(CompileError::InvalidSlice(
            excerpt(x),
            format!("empty range {}:{}", begin, end)
        ))
    }
    let shape = inner.shape();
    let (extent, shape) = match (dim, shape) {
        (0, Shape::Vector(_) | Shape::Matrix(..)) => (
            shape.rows(),
            Shape::matrix(Dim::lit(end - begin), shape.cols()),
        ),
        (1, Shape::Matrix(..)) => (
            shape.cols(),
            Shape::matrix(shape.rows(), Dim::lit(end - begin)),
        ),
        _ => bail!(CompileError::InvalidSlice(
            excerpt(x),
            format!("can not slice a {} along dimension {}", shape, dim)
        )),
    };
    if let Some(size) = extent.as_literal() {
        if end > size {
            bail!(CompileError::InvalidSlice(
                excerpt(x),
                format!("{}:{} is out of bounds for a size of {}", begin, end, size)
            ))
        }
    }

    Ok(Node::raw(
        Expression::Slice {
            inner: inner.clone(),
            kind,
            begin,
            end,
            dim,
        },
        Attributes {
            shape,
            ..inner.t().clone()
        },
    ))
}

pub fn to_vector(x: &Node) -> Result<Node> {
    match (x.e(), x.shape()) {
        (Expression::ToVector(_), _) => Ok(x.clone()),
        (_, Shape::Vector(_)) => Ok(Node::raw(Expression::ToVector(x.clone()), x.t().clone())),
        _ => bail!(CompileError::InvalidCast(
            excerpt(x),
            x.shape().clone(),
            "vector"
        )),
    }
}

pub fn to_matrix(x: &Node) -> Result<Node> {
    match (x.e(), x.shape()) {
        (Expression::ToMatrix(_), _) => Ok(x.clone()),
        (_, Shape::Matrix(..)) => Ok(Node::raw(Expression::ToMatrix(x.clone()), x.t().clone())),
        _ => bail!(CompileError::InvalidCast(
            excerpt(x),
            x.shape().clone(),
            "matrix"
        )),
    }
}

/// Apply the atom called `name` to `args`.
pub fn atom(name: &str, args: Vec<Node>) -> Result<Node> {
    let f = atoms::lookup(name)?;
    let t = f.attributes(&args)?;
    let e = match f {
        Atom::Norm => Expression::Norm(args),
        Atom::Abs => Expression::Abs(args[0].clone()),
        _ => Expression::Atom { atom: f, args },
    };
    Ok(Node::raw(e, t))
}

pub fn norm(args: Vec<Node>) -> Result<Node> {
    atom(Atom::Norm.name(), args)
}

pub fn abs(x: &Node) -> Result<Node> {
    atom(Atom::Abs.name(), vec![x.clone()])
}

pub fn vstack(args: Vec<Node>) -> Result<Node> {
    if args.len() == 1 {
        return Ok(args[0].clone());
    }
    let t = atoms::vstack_attributes(&args)?;
    Ok(Node::raw(Expression::Vstack(args), t))
}

/// Build the constraint `lhs <op> rhs`.
///
/// Comparisons that can be decided right away produce either `Ok(None)`
/// when they trivially hold, or an [`Infeasible`] error when they can never
/// hold.
pub fn compare(lhs: &Node, op: Comparison, rhs: &Node) -> Result<Option<RelOp>> {
    if op == Comparison::Ge {
        return compare(rhs, Comparison::Le, lhs);
    }

    let residual = sub(lhs, rhs)?;
    if let Some(r) = residual.as_number() {
        let holds = match op {
            Comparison::Eq => r == 0.0,
            _ => r <= 0.0,
        };
        if !holds {
            bail!(Infeasible(format!("{} {} {}", lhs, op, rhs)))
        }
        return Ok(None);
    }

    Ok(Some(RelOp {
        op,
        lhs: residual,
        rhs: Node::zero(),
    }))
}

/// Whether a node was built by the smart constructors of this module, i.e.
/// satisfies the normal form they maintain.
pub fn is_normalized(x: &Node) -> bool {
    match x.e() {
        Expression::Add(l, r) | Expression::Multiply(l, r) => {
            !r.is_number() && is_normalized(l) && is_normalized(r)
        }
        Expression::Negate(x) => {
            !matches!(x.e(), Expression::Negate(_) | Expression::Number(_)) && is_normalized(x)
        }
        _ => true,
    }
}
