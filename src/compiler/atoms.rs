use std::collections::HashMap;
use std::fmt;

use anyhow::*;
use serde::{Deserialize, Serialize};

use super::node::Node;
use super::types::{Attributes, Curvature, Dim, Monotonicity, Shape, Sign};
use crate::errors::CompileError;

lazy_static::lazy_static! {
    pub static ref ATOMS: HashMap<&'static str, Atom> = maplit::hashmap!{
        "norm" => Atom::Norm,
        "norm2" => Atom::Norm,
        "abs" => Atom::Abs,
        "pos" => Atom::Pos,
        "neg" => Atom::Neg,
        "square" => Atom::Square,
        "sqrt" => Atom::Sqrt,
        "sum" => Atom::Sum,
    };
}

/// Look an atom up by the name it is called with in source programs.
pub fn lookup(name: &str) -> Result<Atom> {
    ATOMS
        .get(name)
        .copied()
        .ok_or_else(|| CompileError::UnknownAtom(name.to_owned()).into())
}

/// The functions a DCP program may call, beyond the arithmetic operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Atom {
    /// Euclidean norm of the stacked arguments
    Norm,
    /// Elementwise absolute value
    Abs,
    /// Elementwise `max(x, 0)`
    Pos,
    /// Elementwise `max(-x, 0)`
    Neg,
    /// Elementwise `x^2`
    Square,
    /// Elementwise `sqrt(x)`
    Sqrt,
    /// Sum of the entries of a vector
    Sum,
}

pub enum Arity {
    AtLeast(usize),
    Monadic,
}
impl Arity {
    fn make_error(&self, l: usize) -> String {
        fn arg_count(x: usize) -> String {
            format!("{} argument{}", x, if x > 1 { "s" } else { "" })
        }
        match self {
            Arity::AtLeast(x) => format!("expected at least {}, but received {}", arg_count(*x), l),
            Arity::Monadic => format!("expected {}, but received {}", arg_count(1), l),
        }
    }

    fn validate(&self, l: usize) -> Result<()> {
        if match self {
            Arity::AtLeast(x) => l >= *x,
            Arity::Monadic => l == 1,
        } {
            Ok(())
        } else {
            bail!(self.make_error(l))
        }
    }
}

/// The `FuncVerifier` trait defines a function that can check that
/// it is called with valid arguments
pub trait FuncVerifier<T> {
    /// The arity of the function
    fn arity(&self) -> Arity;

    /// Returns `Ok(())` if the arguments are of correct arity; `Err` otherwise
    fn validate_arity(&self, args: &[T]) -> Result<()> {
        self.arity().validate(args.len())
    }

    /// Returns `Ok(())` if the arguments are of correct shape; `Err` otherwise
    fn validate_types(&self, args: &[T]) -> Result<()>;

    /// Checks that the arguments are of correct arity and shape
    fn validate_args(&self, args: &[T]) -> Result<()> {
        self.validate_arity(args)
            .and_then(|_| self.validate_types(args))
    }
}

impl FuncVerifier<Node> for Atom {
    fn arity(&self) -> Arity {
        match self {
            Atom::Norm => Arity::AtLeast(1),
            _ => Arity::Monadic,
        }
    }

    fn validate_types(&self, args: &[Node]) -> Result<()> {
        match args.iter().find(|a| !a.shape().is_columnar()) {
            Some(a) => bail!("expected scalars or vectors, found {} ({})", a, a.shape()),
            None => Ok(()),
        }
    }
}

impl Atom {
    pub fn name(&self) -> &'static str {
        match self {
            Atom::Norm => "norm",
            Atom::Abs => "abs",
            Atom::Pos => "pos",
            Atom::Neg => "neg",
            Atom::Square => "square",
            Atom::Sqrt => "sqrt",
            Atom::Sum => "sum",
        }
    }

    pub fn curvature(&self) -> Curvature {
        match self {
            Atom::Norm | Atom::Abs | Atom::Pos | Atom::Neg | Atom::Square => Curvature::Convex,
            Atom::Sqrt => Curvature::Concave,
            Atom::Sum => Curvature::Affine,
        }
    }

    pub fn monotonicity(&self, arg: &Node) -> Monotonicity {
        match self {
            Atom::Norm | Atom::Abs | Atom::Square => match arg.sign() {
                Sign::Positive => Monotonicity::Increasing,
                Sign::Negative => Monotonicity::Decreasing,
                Sign::Neither => Monotonicity::Nonmonotone,
            },
            Atom::Pos | Atom::Sqrt | Atom::Sum => Monotonicity::Increasing,
            Atom::Neg => Monotonicity::Decreasing,
        }
    }

    fn sign(&self, args: &[Node]) -> Sign {
        match self {
            Atom::Sum => args[0].sign(),
            _ => Sign::Positive,
        }
    }

    fn shape(&self, args: &[Node]) -> Shape {
        match self {
            Atom::Norm | Atom::Sum => Shape::Scalar,
            _ => args[0].shape().clone(),
        }
    }

    /// Compute the attributes of this atom applied to `args`.
    pub fn attributes(&self, args: &[Node]) -> Result<Attributes> {
        self.validate_args(args).map_err(|e| CompileError::Atom {
            name: self.name().to_owned(),
            reason: e.to_string(),
        })?;

        let curvature = args
            .iter()
            .map(|a| {
                self.curvature()
                    .compose(self.monotonicity(a), a.curvature())
            })
            .reduce(|a, b| a + b)
            .unwrap_or(Curvature::Nonconvex);

        Ok(Attributes {
            curvature,
            sign: self.sign(args),
            shape: self.shape(args),
        })
    }
}
impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Attributes of a vertical stack: curvatures and signs combine like a sum,
/// and the rows of the components add up.
pub fn vstack_attributes(args: &[Node]) -> Result<Attributes> {
    if args.is_empty() {
        bail!(CompileError::Atom {
            name: "vstack".into(),
            reason: "expected at least 1 argument, but received 0".into(),
        })
    }
    if let Some(a) = args.iter().find(|a| !a.shape().is_columnar()) {
        bail!(CompileError::Atom {
            name: "vstack".into(),
            reason: format!("expected scalars or vectors, found {} ({})", a, a.shape()),
        })
    }

    let rows = args
        .iter()
        .map(|a| a.shape().rows())
        .fold(Dim::lit(0), |ax, r| &ax + &r);
    Ok(Attributes {
        curvature: args
            .iter()
            .map(|a| a.curvature())
            .fold(Curvature::Constant, |ax, c| ax + c),
        sign: args
            .iter()
            .map(|a| a.sign())
            .reduce(|a, b| a + b)
            .unwrap_or(Sign::Neither),
        shape: Shape::vector(rows),
    })
}
