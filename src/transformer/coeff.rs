use std::collections::{BTreeSet, HashMap};
use std::fmt;

use anyhow::*;
use serde::{Deserialize, Serialize};

use crate::compiler::{Atom, Expression, LeafKind, Node};
use crate::errors::{excerpt, CompileError, ConfigError, InternalError};
use crate::structs::{dense, Dense, Params};

/// A coefficient: an expression over parameters and numbers only, with
/// concrete dimensions. Coefficients are what stuffing instructions carry
/// into the solver matrices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Coeff {
    Number(f64),
    Parameter {
        name: String,
        rows: usize,
        cols: usize,
    },
    /// The `n x n` identity
    Eye(usize),
    /// A column of `n` ones
    Ones(usize),
    Add(Box<Coeff>, Box<Coeff>),
    Mul(Box<Coeff>, Box<Coeff>),
    Neg(Box<Coeff>),
    Transpose(Box<Coeff>),
    Slice {
        inner: Box<Coeff>,
        begin: usize,
        end: usize,
        dim: usize,
    },
}

/// The structure of a coefficient, as far as stuffing is concerned.
#[derive(Debug, Clone, PartialEq)]
pub enum Pattern {
    /// `value` on the entries `(i, offset + i)` for `i` in `0..len`
    Diagonal {
        len: usize,
        offset: usize,
        value: Coeff,
    },
    /// A column of `len` entries, all equal to `value`
    Column { len: usize, value: Coeff },
    General,
}

impl Coeff {
    pub fn shape(&self) -> (usize, usize) {
        match self {
            Coeff::Number(_) => (1, 1),
            Coeff::Parameter { rows, cols, .. } => (*rows, *cols),
            Coeff::Eye(n) => (*n, *n),
            Coeff::Ones(n) => (*n, 1),
            Coeff::Add(a, b) => {
                if a.is_scalar() {
                    b.shape()
                } else {
                    a.shape()
                }
            }
            Coeff::Mul(a, b) => match (a.is_scalar(), b.is_scalar()) {
                (true, _) => b.shape(),
                (_, true) => a.shape(),
                _ => (a.shape().0, b.shape().1),
            },
            Coeff::Neg(a) => a.shape(),
            Coeff::Transpose(a) => {
                let (r, c) = a.shape();
                (c, r)
            }
            Coeff::Slice {
                inner,
                begin,
                end,
                dim,
            } => {
                let (r, c) = inner.shape();
                if *dim == 0 {
                    (end - begin, c)
                } else {
                    (r, end - begin)
                }
            }
        }
    }

    pub fn is_scalar(&self) -> bool {
        self.shape() == (1, 1)
    }
    pub fn is_zero(&self) -> bool {
        matches!(self, Coeff::Number(x) if *x == 0.0)
    }
    pub fn is_one(&self) -> bool {
        matches!(self, Coeff::Number(x) if *x == 1.0)
    }

    /// Repeat a scalar coefficient over a `rows x cols` block.
    pub fn broadcast(self, rows: usize, cols: usize) -> Coeff {
        if !self.is_scalar() || (rows, cols) == (1, 1) {
            self
        } else if cols == 1 {
            Coeff::Ones(rows).mul(self)
        } else {
            Coeff::Ones(rows)
                .mul(self)
                .mul(Coeff::Ones(cols).transpose())
        }
    }

    pub fn add(self, other: Coeff) -> Coeff {
        match (self, other) {
            (Coeff::Number(x), Coeff::Number(y)) => Coeff::Number(x + y),
            (x, y) if x.is_zero() => y,
            (x, y) if y.is_zero() => x,
            (x, y) => {
                let (r, c) = if x.is_scalar() { y.shape() } else { x.shape() };
                Coeff::Add(Box::new(x.broadcast(r, c)), Box::new(y.broadcast(r, c)))
            }
        }
    }

    pub fn mul(self, other: Coeff) -> Coeff {
        match (self, other) {
            (Coeff::Number(x), Coeff::Number(y)) => Coeff::Number(x * y),
            (x, y) if x.is_zero() || y.is_zero() => Coeff::Number(0.0),
            (x, y) if x.is_one() => y,
            (x, y) if y.is_one() => x,
            (Coeff::Neg(x), y) => (*x).mul(y).neg(),
            (x, Coeff::Neg(y)) => x.mul(*y).neg(),
            (x, y) if y.is_scalar() && !x.is_scalar() => y.mul(x),
            (Coeff::Number(x), Coeff::Mul(a, b)) => match *a {
                Coeff::Number(y) => Coeff::Number(x * y).mul(*b),
                a => Coeff::Mul(Box::new(Coeff::Number(x)), Box::new(Coeff::Mul(Box::new(a), b))),
            },
            (Coeff::Eye(_), y) if !y.is_scalar() => y,
            (x, Coeff::Eye(_)) if !x.is_scalar() => x,
            (x, y) => Coeff::Mul(Box::new(x), Box::new(y)),
        }
    }

    pub fn neg(self) -> Coeff {
        match self {
            Coeff::Number(x) => Coeff::Number(if x == 0.0 { 0.0 } else { -x }),
            Coeff::Neg(x) => *x,
            Coeff::Mul(a, b) if matches!(*a, Coeff::Number(_)) => (*a).neg().mul(*b),
            x => Coeff::Neg(Box::new(x)),
        }
    }

    pub fn transpose(self) -> Coeff {
        match self {
            x if x.is_scalar() => x,
            Coeff::Eye(n) => Coeff::Eye(n),
            Coeff::Transpose(x) => *x,
            Coeff::Neg(x) => (*x).transpose().neg(),
            Coeff::Mul(a, b) if a.is_scalar() => (*a).mul((*b).transpose()),
            x => Coeff::Transpose(Box::new(x)),
        }
    }

    pub fn slice(self, begin: usize, end: usize, dim: usize) -> Coeff {
        let (r, c) = self.shape();
        let extent = if dim == 0 { r } else { c };
        if begin == 0 && end == extent {
            return self;
        }
        match self {
            Coeff::Neg(x) => (*x).slice(begin, end, dim).neg(),
            Coeff::Mul(a, b) if a.is_scalar() => (*a).mul((*b).slice(begin, end, dim)),
            Coeff::Ones(_) if dim == 0 => Coeff::Ones(end - begin),
            x => Coeff::Slice {
                inner: Box::new(x),
                begin,
                end,
                dim,
            },
        }
    }

    /// Convert a constant expression, with all its dimensions bound.
    pub fn from_node(node: &Node, dims: &HashMap<String, usize>) -> Result<Coeff> {
        if !node.is_constant() {
            bail!(InternalError::NotAffine(excerpt(node)))
        }

        Ok(match node.e() {
            Expression::Number(x) => Coeff::Number(*x),
            Expression::Parameter(name) => {
                let (rows, cols) = node.shape().eval(dims)?;
                Coeff::Parameter {
                    name: name.to_owned(),
                    rows,
                    cols,
                }
            }
            Expression::Add(a, b) => Coeff::from_node(a, dims)?.add(Coeff::from_node(b, dims)?),
            Expression::Multiply(a, b) => {
                Coeff::from_node(a, dims)?.mul(Coeff::from_node(b, dims)?)
            }
            Expression::Negate(a) => Coeff::from_node(a, dims)?.neg(),
            Expression::Transpose(a) => Coeff::from_node(a, dims)?.transpose(),
            Expression::Slice {
                inner,
                kind: LeafKind::Parameter,
                begin,
                end,
                dim,
            } => {
                let c = Coeff::from_node(inner, dims)?;
                let (r, k) = c.shape();
                let extent = if *dim == 0 { r } else { k };
                if *end > extent {
                    bail!(CompileError::InvalidSlice(
                        excerpt(inner),
                        format!("{}:{} is out of bounds for a size of {}", begin, end, extent)
                    ))
                }
                c.slice(*begin, *end, *dim)
            }
            Expression::ToVector(a) | Expression::ToMatrix(a) => Coeff::from_node(a, dims)?,
            Expression::Atom {
                atom: Atom::Sum,
                args,
            } => {
                let a = Coeff::from_node(&args[0], dims)?;
                let rows = a.shape().0;
                Coeff::Ones(rows).transpose().mul(a)
            }
            _ => bail!(CompileError::Unsupported(format!(
                "constant expression {}",
                excerpt(node)
            ))),
        })
    }

    /// The parameters this coefficient depends on.
    pub fn parameters(&self) -> BTreeSet<&str> {
        let mut r = BTreeSet::new();
        self.visit(&mut |c| {
            if let Coeff::Parameter { name, .. } = c {
                r.insert(name.as_str());
            }
        });
        r
    }

    fn visit<'a>(&'a self, f: &mut impl FnMut(&'a Coeff)) {
        f(self);
        match self {
            Coeff::Add(a, b) | Coeff::Mul(a, b) => {
                a.visit(f);
                b.visit(f);
            }
            Coeff::Neg(a) | Coeff::Transpose(a) => a.visit(f),
            Coeff::Slice { inner, .. } => inner.visit(f),
            _ => {}
        }
    }

    pub fn eval(&self, params: &Params) -> Result<Dense> {
        match self {
            Coeff::Number(x) => Ok(dense::scalar(*x)),
            Coeff::Parameter { name, rows, cols } => {
                let v = params
                    .get(name)
                    .ok_or_else(|| ConfigError::MissingParameter(name.to_owned()))?;
                if v.shape() != (*rows, *cols) {
                    bail!(ConfigError::ParameterShape {
                        name: name.to_owned(),
                        expected: (*rows, *cols),
                        found: v.shape(),
                    })
                }
                Ok(v.clone())
            }
            Coeff::Eye(n) => Ok(Dense::identity(*n, *n)),
            Coeff::Ones(n) => Ok(Dense::from_element(*n, 1, 1.0)),
            Coeff::Add(a, b) => dense::add(&a.eval(params)?, &b.eval(params)?),
            Coeff::Mul(a, b) => dense::mul(&a.eval(params)?, &b.eval(params)?),
            Coeff::Neg(a) => Ok(-a.eval(params)?),
            Coeff::Transpose(a) => Ok(a.eval(params)?.transpose()),
            Coeff::Slice {
                inner,
                begin,
                end,
                dim,
            } => dense::slice(&inner.eval(params)?, *begin, *end, *dim),
        }
    }

    pub fn pattern(&self) -> Pattern {
        match self {
            Coeff::Eye(n) => Pattern::Diagonal {
                len: *n,
                offset: 0,
                value: Coeff::Number(1.0),
            },
            Coeff::Slice {
                inner,
                begin,
                end,
                dim: 0,
            } if matches!(**inner, Coeff::Eye(_)) => Pattern::Diagonal {
                len: end - begin,
                offset: *begin,
                value: Coeff::Number(1.0),
            },
            Coeff::Ones(n) => Pattern::Column {
                len: *n,
                value: Coeff::Number(1.0),
            },
            x if x.is_scalar() => Pattern::Column {
                len: 1,
                value: x.clone(),
            },
            Coeff::Mul(s, x) if s.is_scalar() => match x.pattern() {
                Pattern::Diagonal { len, offset, value } => Pattern::Diagonal {
                    len,
                    offset,
                    value: s.as_ref().clone().mul(value),
                },
                Pattern::Column { len, value } => Pattern::Column {
                    len,
                    value: s.as_ref().clone().mul(value),
                },
                Pattern::General => Pattern::General,
            },
            Coeff::Neg(x) => match x.pattern() {
                Pattern::Diagonal { len, offset, value } => Pattern::Diagonal {
                    len,
                    offset,
                    value: value.neg(),
                },
                Pattern::Column { len, value } => Pattern::Column {
                    len,
                    value: value.neg(),
                },
                Pattern::General => Pattern::General,
            },
            _ => Pattern::General,
        }
    }
}

impl fmt::Display for Coeff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Coeff::Number(x) => write!(f, "{}", x),
            Coeff::Parameter { name, .. } => write!(f, "{}", name),
            Coeff::Eye(n) => write!(f, "eye({})", n),
            Coeff::Ones(n) => write!(f, "ones({})", n),
            Coeff::Add(a, b) => write!(f, "({} + {})", a, b),
            Coeff::Mul(a, b) => write!(f, "{}*{}", a, b),
            Coeff::Neg(a) => write!(f, "-{}", a),
            Coeff::Transpose(a) => write!(f, "{}'", a),
            Coeff::Slice {
                inner,
                begin,
                end,
                dim,
            } => {
                if *dim == 0 {
                    write!(f, "{}({}:{}, :)", inner, begin, end)
                } else {
                    write!(f, "{}(:, {}:{})", inner, begin, end)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn param(name: &str, rows: usize, cols: usize) -> Coeff {
        Coeff::Parameter {
            name: name.into(),
            rows,
            cols,
        }
    }

    #[test]
    fn folding() {
        assert_eq!(Coeff::Number(2.0).mul(Coeff::Number(3.0)), Coeff::Number(6.0));
        assert_eq!(Coeff::Number(1.0).mul(Coeff::Eye(3)), Coeff::Eye(3));
        assert!(Coeff::Number(0.0).mul(param("A", 2, 3)).is_zero());
        assert_eq!(Coeff::Eye(3).neg().neg(), Coeff::Eye(3));
        assert_eq!(param("A", 2, 3).mul(Coeff::Eye(3)), param("A", 2, 3));
        assert_eq!(
            Coeff::Ones(4).mul(Coeff::Number(2.0)).shape(),
            (4, 1)
        );
        assert_eq!(param("A", 2, 3).transpose().shape(), (3, 2));
        assert_eq!(param("A", 2, 3).slice(0, 2, 1).shape(), (2, 2));
        assert_eq!(param("A", 2, 3).slice(0, 3, 1), param("A", 2, 3));
    }

    #[test]
    fn broadcast_scalars() {
        let c = Coeff::Number(2.0).add(param("b", 3, 1));
        assert_eq!(c.shape(), (3, 1));
        let params = maplit::hashmap! {"b".to_string() => dense::column(vec![1.0, 2.0, 3.0])};
        assert_eq!(c.eval(&params).unwrap(), dense::column(vec![3.0, 4.0, 5.0]));
    }

    #[test]
    fn patterns() {
        assert_eq!(
            Coeff::Eye(3).neg().pattern(),
            Pattern::Diagonal {
                len: 3,
                offset: 0,
                value: Coeff::Number(-1.0)
            }
        );
        assert_eq!(
            Coeff::Eye(5).slice(1, 3, 0).pattern(),
            Pattern::Diagonal {
                len: 2,
                offset: 1,
                value: Coeff::Number(1.0)
            }
        );
        assert_eq!(
            Coeff::Ones(3).mul(param("a", 1, 1)).pattern(),
            Pattern::Column {
                len: 3,
                value: param("a", 1, 1)
            }
        );
        assert_eq!(param("A", 2, 3).pattern(), Pattern::General);
    }

    #[test]
    fn evaluation_errors() {
        let params = maplit::hashmap! {"A".to_string() => Dense::identity(2, 2)};
        assert!(param("A", 2, 3).eval(&params).is_err());
        assert!(param("B", 2, 3).eval(&params).is_err());
        assert_eq!(param("A", 2, 2).eval(&params).unwrap(), Dense::identity(2, 2));
    }
}
