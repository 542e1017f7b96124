use std::collections::{BTreeSet, HashMap};
use std::fmt;

use anyhow::*;
use serde::{Deserialize, Serialize};

use super::node::{LeafKind, Node, RelOp};
use super::types::{Shape, Sign};
use crate::errors::{excerpt, CompileError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sense {
    Minimize,
    Maximize,
}
impl fmt::Display for Sense {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sense::Minimize => write!(f, "minimize"),
            Sense::Maximize => write!(f, "maximize"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Objective {
    pub sense: Sense,
    pub expr: Node,
}
impl Objective {
    /// A feasibility problem.
    pub fn find() -> Objective {
        Objective {
            sense: Sense::Minimize,
            expr: Node::zero(),
        }
    }

    pub fn is_dcp(&self) -> bool {
        self.expr.shape().is_scalar()
            && match self.sense {
                Sense::Minimize => self.expr.curvature().is_convex(),
                Sense::Maximize => self.expr.curvature().is_concave(),
            }
    }
}
impl fmt::Display for Objective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.sense, self.expr)
    }
}

/// A parameter or variable declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct Declaration {
    pub name: String,
    pub kind: LeafKind,
    pub shape: Shape,
    pub sign: Sign,
}
impl Declaration {
    pub fn node(&self) -> Node {
        match self.kind {
            LeafKind::Parameter => Node::parameter()
                .name(self.name.as_str())
                .shape(self.shape.clone())
                .sign(self.sign)
                .build(),
            LeafKind::Variable => Node::variable()
                .name(self.name.as_str())
                .shape(self.shape.clone())
                .build(),
        }
    }
}
impl fmt::Display for Declaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            LeafKind::Parameter => "parameter",
            LeafKind::Variable => "variable",
        };
        let shape = match &self.shape {
            Shape::Scalar => String::new(),
            Shape::Vector(r) => format!("({})", r),
            Shape::Matrix(r, c) => format!("({}, {})", r, c),
        };
        let sign = match (self.kind, self.sign) {
            (LeafKind::Parameter, Sign::Positive) => " positive",
            (LeafKind::Parameter, Sign::Negative) => " negative",
            _ => "",
        };
        write!(f, "{} {}{}{}", kind, self.name, shape, sign)
    }
}

/// A parsed problem: declarations, objective and constraints, in source
/// order.
#[derive(Debug, Clone)]
pub struct Program {
    pub dimensions: Vec<String>,
    /// Dimensions bound to a value in the source itself
    pub bound: HashMap<String, usize>,
    pub parameters: Vec<Declaration>,
    pub variables: Vec<Declaration>,
    pub objective: Objective,
    pub constraints: Vec<RelOp>,
}
impl Default for Program {
    fn default() -> Self {
        Program {
            dimensions: Vec::new(),
            bound: HashMap::new(),
            parameters: Vec::new(),
            variables: Vec::new(),
            objective: Objective::find(),
            constraints: Vec::new(),
        }
    }
}

impl Program {
    fn is_declared(&self, name: &str) -> bool {
        self.dimensions.iter().any(|d| d == name)
            || self.parameters.iter().any(|p| p.name == name)
            || self.variables.iter().any(|v| v.name == name)
    }

    pub fn declare_dimension(&mut self, name: &str, value: Option<usize>) -> Result<()> {
        if self.is_declared(name) {
            bail!(CompileError::Duplicate(name.to_owned()))
        }
        self.dimensions.push(name.to_owned());
        if let Some(value) = value {
            self.bound.insert(name.to_owned(), value);
        }
        Ok(())
    }

    pub fn declare(&mut self, d: Declaration) -> Result<Node> {
        if self.is_declared(&d.name) {
            bail!(CompileError::Duplicate(d.name))
        }
        if let Some(unknown) = d
            .shape
            .symbols()
            .into_iter()
            .find(|s| !self.dimensions.iter().any(|d| d == s))
        {
            bail!(CompileError::Undeclared(unknown.to_owned()))
        }
        if d.kind == LeafKind::Variable && !d.shape.is_columnar() {
            bail!(CompileError::Unsupported(format!(
                "matrix variable `{}`",
                d.name
            )))
        }

        let node = d.node();
        match d.kind {
            LeafKind::Parameter => self.parameters.push(d),
            LeafKind::Variable => self.variables.push(d),
        }
        Ok(node)
    }

    pub fn parameter(&self, name: &str) -> Option<&Declaration> {
        self.parameters.iter().find(|p| p.name == name)
    }
    pub fn variable(&self, name: &str) -> Option<&Declaration> {
        self.variables.iter().find(|v| v.name == name)
    }
    pub fn lookup(&self, name: &str) -> Option<&Declaration> {
        self.parameter(name).or_else(|| self.variable(name))
    }

    /// Every dimension the parameters and variables depend on.
    pub fn used_dimensions(&self) -> BTreeSet<&str> {
        self.parameters
            .iter()
            .chain(self.variables.iter())
            .flat_map(|d| d.shape.symbols())
            .collect()
    }

    pub fn is_dcp(&self) -> bool {
        self.objective.is_dcp() && self.constraints.iter().all(|c| c.is_dcp())
    }

    /// Fail with an error pointing at the first part of the problem that
    /// breaks the DCP rules, if any.
    pub fn check_dcp(&self) -> Result<()> {
        if !self.objective.expr.shape().is_scalar() {
            bail!(CompileError::NotDcp(format!(
                "non-scalar objective {}",
                excerpt(&self.objective.expr)
            )))
        }
        if !self.objective.is_dcp() {
            bail!(CompileError::NotDcp(format!(
                "{} objective `{}`",
                self.objective.expr.curvature(),
                excerpt(&self.objective)
            )))
        }
        if let Some(c) = self.constraints.iter().find(|c| !c.is_dcp()) {
            bail!(CompileError::NotDcp(format!(
                "{} constraint `{}`",
                c.lhs.curvature(),
                excerpt(c)
            )))
        }
        Ok(())
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for d in self.dimensions.iter() {
            match self.bound.get(d) {
                Some(v) => writeln!(f, "dimension {} = {}", d, v)?,
                None => writeln!(f, "dimension {}", d)?,
            }
        }
        for p in self.parameters.iter().chain(self.variables.iter()) {
            writeln!(f, "{}", p)?;
        }
        writeln!(f, "{}", self.objective)?;
        if !self.constraints.is_empty() {
            writeln!(f, "subject to")?;
            for c in self.constraints.iter() {
                writeln!(f, "    {}", c)?;
            }
        }
        std::fmt::Result::Ok(())
    }
}
