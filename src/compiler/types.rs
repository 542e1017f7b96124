use std::collections::{BTreeMap, HashMap};
use std::fmt;

use anyhow::*;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::errors::{CompileError, ConfigError};

/// The DCP curvature of an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Curvature {
    Constant,
    Affine,
    Convex,
    Concave,
    Nonconvex,
}
impl Curvature {
    pub const ALL: [Curvature; 5] = [
        Curvature::Constant,
        Curvature::Affine,
        Curvature::Convex,
        Curvature::Concave,
        Curvature::Nonconvex,
    ];

    pub fn is_constant(self) -> bool {
        matches!(self, Curvature::Constant)
    }
    pub fn is_affine(self) -> bool {
        matches!(self, Curvature::Constant | Curvature::Affine)
    }
    pub fn is_convex(self) -> bool {
        matches!(
            self,
            Curvature::Constant | Curvature::Affine | Curvature::Convex
        )
    }
    pub fn is_concave(self) -> bool {
        matches!(
            self,
            Curvature::Constant | Curvature::Affine | Curvature::Concave
        )
    }

    /// The curvature of `k * self` for a constant `k` of sign `s`.
    pub fn scale(self, s: Sign) -> Curvature {
        match (self, s) {
            (Curvature::Constant, _) => Curvature::Constant,
            (Curvature::Affine, _) => Curvature::Affine,
            (Curvature::Nonconvex, _) => Curvature::Nonconvex,
            (c, Sign::Positive) => c,
            (c, Sign::Negative) => -c,
            (_, Sign::Neither) => Curvature::Nonconvex,
        }
    }

    /// The curvature of `f(arg)`, where `f` has curvature `self` and the
    /// given monotonicity with respect to `arg`.
    pub fn compose(self, monotonicity: Monotonicity, arg: Curvature) -> Curvature {
        match arg {
            Curvature::Constant | Curvature::Affine if self == Curvature::Affine => arg,
            Curvature::Constant | Curvature::Affine => self,
            Curvature::Nonconvex => Curvature::Nonconvex,
            Curvature::Convex | Curvature::Concave => {
                let effective = match monotonicity {
                    Monotonicity::Increasing => arg,
                    Monotonicity::Decreasing => -arg,
                    Monotonicity::Nonmonotone => Curvature::Nonconvex,
                };
                match (self, effective) {
                    (_, Curvature::Nonconvex) => Curvature::Nonconvex,
                    (Curvature::Affine, e) => e,
                    (f, e) if f == e => f,
                    _ => Curvature::Nonconvex,
                }
            }
        }
    }
}
impl std::ops::Add for Curvature {
    type Output = Curvature;

    fn add(self, rhs: Curvature) -> Curvature {
        match (self, rhs) {
            (Curvature::Nonconvex, _) | (_, Curvature::Nonconvex) => Curvature::Nonconvex,
            (Curvature::Constant, x) | (x, Curvature::Constant) => x,
            (Curvature::Affine, x) | (x, Curvature::Affine) => x,
            (Curvature::Convex, Curvature::Convex) => Curvature::Convex,
            (Curvature::Concave, Curvature::Concave) => Curvature::Concave,
            _ => Curvature::Nonconvex,
        }
    }
}
impl std::ops::Neg for Curvature {
    type Output = Curvature;

    fn neg(self) -> Curvature {
        match self {
            Curvature::Convex => Curvature::Concave,
            Curvature::Concave => Curvature::Convex,
            x => x,
        }
    }
}
impl fmt::Display for Curvature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Curvature::Constant => "constant",
                Curvature::Affine => "affine",
                Curvature::Convex => "convex",
                Curvature::Concave => "concave",
                Curvature::Nonconvex => "nonconvex",
            }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sign {
    Positive,
    Negative,
    Neither,
}
impl Sign {
    pub const ALL: [Sign; 3] = [Sign::Positive, Sign::Negative, Sign::Neither];

    pub fn of(x: f64) -> Sign {
        if x >= 0.0 {
            Sign::Positive
        } else {
            Sign::Negative
        }
    }
}
impl std::ops::Add for Sign {
    type Output = Sign;

    fn add(self, rhs: Sign) -> Sign {
        match (self, rhs) {
            (Sign::Positive, Sign::Positive) => Sign::Positive,
            (Sign::Negative, Sign::Negative) => Sign::Negative,
            _ => Sign::Neither,
        }
    }
}
impl std::ops::Mul for Sign {
    type Output = Sign;

    fn mul(self, rhs: Sign) -> Sign {
        match (self, rhs) {
            (Sign::Neither, _) | (_, Sign::Neither) => Sign::Neither,
            (x, y) if x == y => Sign::Positive,
            _ => Sign::Negative,
        }
    }
}
impl std::ops::Neg for Sign {
    type Output = Sign;

    fn neg(self) -> Sign {
        match self {
            Sign::Positive => Sign::Negative,
            Sign::Negative => Sign::Positive,
            Sign::Neither => Sign::Neither,
        }
    }
}
impl fmt::Display for Sign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Sign::Positive => "positive",
                Sign::Negative => "negative",
                Sign::Neither => "unknown sign",
            }
        )
    }
}

/// How an atom reacts to an increase of one of its arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Monotonicity {
    Increasing,
    Decreasing,
    Nonmonotone,
}

/// A symbolic dimension, i.e. a constant plus a non-negative combination of
/// named dimensions such as `n + 2*m + 1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Dim {
    constant: usize,
    symbols: BTreeMap<String, usize>,
}
impl Dim {
    pub fn lit(n: usize) -> Dim {
        Dim {
            constant: n,
            symbols: Default::default(),
        }
    }
    pub fn sym(name: &str) -> Dim {
        Dim {
            constant: 0,
            symbols: [(name.to_owned(), 1)].into_iter().collect(),
        }
    }
    pub fn scaled(self, k: usize) -> Dim {
        Dim {
            constant: self.constant * k,
            symbols: self
                .symbols
                .into_iter()
                .map(|(s, c)| (s, c * k))
                .filter(|(_, c)| *c > 0)
                .collect(),
        }
    }
    pub fn as_literal(&self) -> Option<usize> {
        self.symbols.is_empty().then_some(self.constant)
    }
    /// If this dimension is exactly one named dimension, return its name.
    pub fn as_symbol(&self) -> Option<&str> {
        if self.constant == 0 && self.symbols.len() == 1 {
            self.symbols
                .iter()
                .next()
                .and_then(|(s, c)| (*c == 1).then_some(s.as_str()))
        } else {
            None
        }
    }
    pub fn is_one(&self) -> bool {
        self.as_literal() == Some(1)
    }
    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.symbols.keys().map(|s| s.as_str())
    }
    pub fn eval(&self, dims: &HashMap<String, usize>) -> Result<usize> {
        let mut r = self.constant;
        for (s, k) in self.symbols.iter() {
            let v = dims
                .get(s)
                .ok_or_else(|| ConfigError::UnboundDimension(s.to_owned()))?;
            r += k * v;
        }
        Ok(r)
    }
}
impl std::ops::Add for &Dim {
    type Output = Dim;

    fn add(self, rhs: &Dim) -> Dim {
        let mut symbols = self.symbols.clone();
        for (s, k) in rhs.symbols.iter() {
            *symbols.entry(s.to_owned()).or_default() += k;
        }
        Dim {
            constant: self.constant + rhs.constant,
            symbols,
        }
    }
}
impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let terms = self
            .symbols
            .iter()
            .map(|(s, k)| {
                if *k == 1 {
                    s.to_owned()
                } else {
                    format!("{}*{}", k, s)
                }
            })
            .chain((self.constant > 0 || self.symbols.is_empty()).then(|| self.constant.to_string()))
            .join(" + ");
        write!(f, "{}", terms)
    }
}

/// The shape of an expression. Constructors normalize `Matrix(1, 1)` to
/// `Scalar` and `Matrix(n, 1)` to `Vector(n)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Shape {
    Scalar,
    Vector(Dim),
    Matrix(Dim, Dim),
}
impl Shape {
    pub fn vector(rows: Dim) -> Shape {
        Shape::matrix(rows, Dim::lit(1))
    }
    pub fn matrix(rows: Dim, cols: Dim) -> Shape {
        match (rows.is_one(), cols.is_one()) {
            (true, true) => Shape::Scalar,
            (false, true) => Shape::Vector(rows),
            _ => Shape::Matrix(rows, cols),
        }
    }

    pub fn rows(&self) -> Dim {
        match self {
            Shape::Scalar => Dim::lit(1),
            Shape::Vector(r) | Shape::Matrix(r, _) => r.clone(),
        }
    }
    pub fn cols(&self) -> Dim {
        match self {
            Shape::Scalar | Shape::Vector(_) => Dim::lit(1),
            Shape::Matrix(_, c) => c.clone(),
        }
    }
    pub fn is_scalar(&self) -> bool {
        matches!(self, Shape::Scalar)
    }
    /// Whether the shape is a scalar or a column vector.
    pub fn is_columnar(&self) -> bool {
        matches!(self, Shape::Scalar | Shape::Vector(_))
    }

    /// The shape of a sum; scalars broadcast against anything.
    pub fn add(&self, other: &Shape) -> Result<Shape> {
        match (self, other) {
            (Shape::Scalar, x) | (x, Shape::Scalar) => Ok(x.clone()),
            (x, y) if x == y => Ok(x.clone()),
            _ => bail!(CompileError::ShapeMismatch(
                "+",
                self.clone(),
                other.clone()
            )),
        }
    }

    /// The shape of a product; scalars are the identity.
    pub fn mul(&self, other: &Shape) -> Result<Shape> {
        match (self, other) {
            (Shape::Scalar, x) | (x, Shape::Scalar) => Ok(x.clone()),
            _ if self.cols() == other.rows() => Ok(Shape::matrix(self.rows(), other.cols())),
            _ => bail!(CompileError::ShapeMismatch(
                "*",
                self.clone(),
                other.clone()
            )),
        }
    }

    pub fn transpose(&self) -> Shape {
        Shape::matrix(self.cols(), self.rows())
    }

    pub fn symbols(&self) -> Vec<&str> {
        match self {
            Shape::Scalar => vec![],
            Shape::Vector(r) => r.symbols().collect(),
            Shape::Matrix(r, c) => r.symbols().chain(c.symbols()).collect(),
        }
    }

    /// The concrete `(rows, cols)` of this shape once dimensions are bound.
    pub fn eval(&self, dims: &HashMap<String, usize>) -> Result<(usize, usize)> {
        Ok((self.rows().eval(dims)?, self.cols().eval(dims)?))
    }
}
impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shape::Scalar => write!(f, "scalar"),
            Shape::Vector(r) => write!(f, "vector({})", r),
            Shape::Matrix(r, c) => write!(f, "matrix({}, {})", r, c),
        }
    }
}

/// The attributes computed for every node at construction time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attributes {
    pub curvature: Curvature,
    pub sign: Sign,
    pub shape: Shape,
}
impl Attributes {
    pub fn negated(&self) -> Attributes {
        Attributes {
            curvature: -self.curvature,
            sign: -self.sign,
            shape: self.shape.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn curvature_is_total() {
        for a in Curvature::ALL {
            for b in Curvature::ALL {
                let _ = a + b;
                for s in Sign::ALL {
                    let _ = a.scale(s);
                }
            }
            assert_eq!(-(-a), a);
        }
    }

    #[test]
    fn curvature_sums() {
        use Curvature::*;
        assert_eq!(Constant + Convex, Convex);
        assert_eq!(Affine + Affine, Affine);
        assert_eq!(Affine + Concave, Concave);
        assert_eq!(Convex + Concave, Nonconvex);
        assert_eq!(Nonconvex + Constant, Nonconvex);
        assert_eq!(Convex.scale(Sign::Negative), Concave);
        assert_eq!(Convex.scale(Sign::Neither), Nonconvex);
        assert_eq!(Affine.scale(Sign::Neither), Affine);
    }

    #[test]
    fn signs() {
        for a in Sign::ALL {
            for b in Sign::ALL {
                let _ = a + b;
                assert_eq!(a * b, b * a);
            }
        }
        assert_eq!(Sign::Negative * Sign::Negative, Sign::Positive);
        assert_eq!(Sign::Positive + Sign::Negative, Sign::Neither);
        assert_eq!(Sign::of(0.0), Sign::Positive);
    }

    #[test]
    fn composition() {
        use Curvature::*;
        assert_eq!(Convex.compose(Monotonicity::Increasing, Convex), Convex);
        assert_eq!(Convex.compose(Monotonicity::Decreasing, Concave), Convex);
        assert_eq!(Convex.compose(Monotonicity::Increasing, Concave), Nonconvex);
        assert_eq!(Convex.compose(Monotonicity::Nonmonotone, Affine), Convex);
        assert_eq!(Concave.compose(Monotonicity::Increasing, Concave), Concave);
        assert_eq!(Affine.compose(Monotonicity::Increasing, Convex), Convex);
        assert_eq!(Affine.compose(Monotonicity::Increasing, Constant), Constant);
        assert_eq!(Convex.compose(Monotonicity::Increasing, Constant), Convex);
    }

    #[test]
    fn shapes_never_panic() {
        let n = Dim::sym("n");
        let m = Dim::sym("m");
        let shapes = [
            Shape::Scalar,
            Shape::vector(n.clone()),
            Shape::vector(m.clone()),
            Shape::matrix(m.clone(), n.clone()),
            Shape::matrix(Dim::lit(1), n.clone()),
        ];
        for a in shapes.iter() {
            for b in shapes.iter() {
                let _ = a.add(b);
                let _ = a.mul(b);
            }
        }

        let a = Shape::matrix(m.clone(), n.clone());
        assert_eq!(a.mul(&Shape::vector(n.clone())).unwrap(), Shape::vector(m.clone()));
        assert!(a.mul(&Shape::vector(m.clone())).is_err());
        assert_eq!(
            Shape::vector(n.clone()).transpose().mul(&Shape::vector(n.clone())).unwrap(),
            Shape::Scalar
        );
        assert_eq!(Shape::vector(Dim::lit(1)), Shape::Scalar);
    }

    #[test]
    fn dimensions() {
        let d = &(&Dim::sym("n") + &Dim::sym("m")) + &Dim::lit(2);
        assert_eq!(d.to_string(), "m + n + 2");
        let dims = maplit::hashmap! {"n".to_string() => 3, "m".to_string() => 4};
        assert_eq!(d.eval(&dims).unwrap(), 9);
        assert!(Dim::sym("k").eval(&dims).is_err());
        assert_eq!(Dim::sym("n").as_symbol(), Some("n"));
        assert_eq!(Dim::sym("n").scaled(2).to_string(), "2*n");
    }
}
