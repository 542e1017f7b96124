use ellipse::Ellipse;
use itertools::Itertools;
use owo_colors::OwoColorize;
use thiserror::Error;

use crate::compiler::Shape;

const MAX_EXPR_LEN: usize = 48;

/// Shorten a printed sub-expression so that error messages stay on one line.
pub fn excerpt(e: impl ToString) -> String {
    e.to_string().as_str().truncate_ellipse(MAX_EXPR_LEN).to_string()
}

/// A constructed expression or program violates the DCP rules.
#[derive(Error, Debug)]
pub enum CompileError {
    #[error(
        "cannot multiply {} by {}: the left operand must be constant",
        .lhs.bold(),
        .rhs.bold()
    )]
    NonConstantProduct { lhs: String, rhs: String },
    #[error("shape mismatch in `{}`: {} and {}", .0, .1.red(), .2.red())]
    ShapeMismatch(&'static str, Shape, Shape),
    #[error("only constants may be transposed, found {}", .0.bold())]
    Transpose(String),
    #[error("invalid slice of {}: {}", .0.bold(), .1)]
    InvalidSlice(String, String),
    #[error("cannot cast {} of shape {} to a {}", .0.bold(), .1, .2)]
    InvalidCast(String, Shape, &'static str),
    #[error("unknown atom `{}`", .0.yellow().bold())]
    UnknownAtom(String),
    #[error("{}: {}", .name.yellow().bold(), .reason)]
    Atom { name: String, reason: String },
    #[error("{} is not DCP-compliant", .0.bold())]
    NotDcp(String),
    #[error("`{}` is already declared", .0.bold())]
    Duplicate(String),
    #[error("`{}` is not declared", .0.bold())]
    Undeclared(String),
    #[error("unsupported construct: {}", .0)]
    Unsupported(String),
}

/// A comparison between literals that can never hold.
#[derive(Error, Debug)]
#[error("problem is trivially infeasible: {} does not hold", .0.red().bold())]
pub struct Infeasible(pub String);

/// An operation was called before the pipeline stage it depends on.
#[derive(Error, Debug)]
pub enum StateError {
    #[error("{}: no problem currently parsed", .0.bold())]
    NotParsed(&'static str),
    #[error("{}: problem has not been canonicalized", .0.bold())]
    NotCanonicalized(&'static str),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(
        "unknown target `{}`; expected one of {}",
        .name.red().bold(),
        .valid.iter().map(|v| v.bold().to_string()).join(", ")
    )]
    UnknownTarget { name: String, valid: Vec<String> },
    #[error("dimension `{}` is not bound", .0.bold())]
    UnboundDimension(String),
    #[error("dimension `{}` bound to both {} and {}", .0.bold(), .1, .2)]
    ConflictingDimension(String, usize, usize),
    #[error("missing value for parameter `{}`", .0.bold())]
    MissingParameter(String),
    #[error(
        "parameter `{}` expects a {}x{} value, found {}x{}",
        .name.bold(),
        .expected.0,
        .expected.1,
        .found.0,
        .found.1
    )]
    ParameterShape {
        name: String,
        expected: (usize, usize),
        found: (usize, usize),
    },
    #[error("invalid value for `{}`: {}", .0.bold(), .1)]
    InvalidValue(String, String),
}

/// Failures of collaborators living outside of the compiler.
#[derive(Error, Debug)]
pub enum ExternalError {
    #[error("no solver available; install one with `Compiler::with_solver`")]
    MissingSolver,
    #[error("solver failed: {}", .0)]
    Solver(String),
}

/// Broken invariants; these point to a bug in the compiler itself.
#[derive(Error, Debug)]
pub enum InternalError {
    #[error("non-DCP expression {} reached canonicalization", .0.bold())]
    NotDcp(String),
    #[error("{} is not affine after epigraph expansion", .0.bold())]
    NotAffine(String),
    #[error(
        "coefficient {} evaluates to {}x{}, expected {}x{}",
        .coeff,
        .found.0,
        .found.1,
        .expected.0,
        .expected.1
    )]
    CoefficientShape {
        coeff: String,
        found: (usize, usize),
        expected: (usize, usize),
    },
    #[error(
        "entry ({}, {}) is out of a {}x{} matrix",
        .index.0,
        .index.1,
        .shape.0,
        .shape.1
    )]
    OutOfBounds {
        index: (usize, usize),
        shape: (usize, usize),
    },
}
