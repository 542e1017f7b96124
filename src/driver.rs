//! The compiler driver, sequencing parsing, canonicalization and code
//! generation.
//!
//! ```text
//!   PARSE --parse--> CANONICALIZE --canonicalize--> CODEGEN --codegen--> COMPLETE
//! ```
//!
//! `parse` is always legal and resets the pipeline; every other step fails
//! with a [`StateError`] when called too early.
use std::collections::{BTreeMap, HashMap};

use anyhow::*;
use log::*;
use serde::{Deserialize, Serialize};

use crate::compiler::{self, Program};
use crate::errors::{ConfigError, ExternalError, StateError};
use crate::exporters::native::SocpData;
use crate::exporters::{self, Generated};
use crate::pretty::Pretty;
use crate::structs::Params;
use crate::transformer::{self, SocpForm};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Stage {
    Parse,
    Canonicalize,
    Codegen,
    Complete,
}

#[derive(Debug, Clone, Default)]
pub struct Settings {
    /// Log the intermediate representations
    pub debug: bool,
    /// A prefix for the names of the generated functions
    pub prefix: Option<String>,
}
#[buildstructor::buildstructor]
impl Settings {
    #[builder]
    pub fn new(debug: Option<bool>, prefix: Option<String>) -> Self {
        Settings {
            debug: debug.unwrap_or(false),
            prefix,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SolverInfo {
    /// The primal cost reached by the solver
    pub pcost: f64,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Solution {
    pub x: Vec<f64>,
    pub info: SolverInfo,
}

/// A cone solver.
pub trait Solver {
    fn solve(&self, data: &SocpData) -> Result<Solution>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolveResult {
    pub objval: f64,
    pub variables: BTreeMap<String, Vec<f64>>,
    pub info: SolverInfo,
}

pub struct Compiler {
    settings: Settings,
    stage: Stage,
    program: Option<Program>,
    dims: HashMap<String, usize>,
    form: Option<SocpForm>,
    generated: Option<Generated>,
    solver: Option<Box<dyn Solver>>,
}

impl Compiler {
    pub fn new(settings: Settings) -> Self {
        Compiler {
            settings,
            stage: Stage::Parse,
            program: None,
            dims: HashMap::new(),
            form: None,
            generated: None,
            solver: None,
        }
    }

    pub fn with_solver(mut self, solver: Box<dyn Solver>) -> Self {
        self.solver = Some(solver);
        self
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }
    pub fn program(&self) -> Option<&Program> {
        self.program.as_ref()
    }
    pub fn form(&self) -> Option<&SocpForm> {
        self.form.as_ref()
    }
    pub fn dims(&self) -> &HashMap<String, usize> {
        &self.dims
    }
    pub fn generated(&self) -> Option<&Generated> {
        self.generated.as_ref()
    }

    fn reset(&mut self) {
        self.stage = Stage::Parse;
        self.program = None;
        self.dims.clear();
        self.form = None;
        self.generated = None;
    }

    /// Parse and verify a new problem, replacing the current one.
    pub fn parse(&mut self, source: &str) -> Result<()> {
        self.reset();
        let program = compiler::parse(source)?;
        program.check_dcp()?;
        if self.settings.debug {
            debug!("parsed program:\n{}", program.pretty());
        }
        self.dims = program.bound.clone();
        self.program = Some(program);
        self.stage = Stage::Canonicalize;
        Ok(())
    }

    pub fn canonicalize(&mut self) -> Result<()> {
        if self.stage == Stage::Parse {
            bail!(StateError::NotParsed("canonicalize"))
        }
        if self.stage > Stage::Canonicalize {
            return Ok(());
        }
        self.recanonicalize()
    }

    fn recanonicalize(&mut self) -> Result<()> {
        let program = self
            .program
            .as_ref()
            .ok_or_else(|| anyhow!(StateError::NotParsed("canonicalize")))?;
        self.form = None;
        self.generated = None;
        self.stage = Stage::Canonicalize;
        let form = transformer::canonicalize(program, &self.dims)?;
        if self.settings.debug {
            debug!("canonical form:\n{}", form.pretty());
        }
        self.form = Some(form);
        self.stage = Stage::Codegen;
        Ok(())
    }

    /// Bind the dimensions; a problem already canonicalized is canonicalized
    /// again with the new values. Dimensions bound in the source can not be
    /// given another value.
    pub fn set_dims(&mut self, dims: HashMap<String, usize>) -> Result<()> {
        let program = self
            .program
            .as_ref()
            .ok_or_else(|| anyhow!(StateError::NotParsed("set_dims")))?;
        for (name, size) in dims.iter() {
            match program.bound.get(name) {
                Some(bound) if bound != size => bail!(ConfigError::ConflictingDimension(
                    name.to_owned(),
                    *bound,
                    *size
                )),
                _ => {}
            }
        }
        self.dims.extend(dims);
        if self.form.is_some() {
            self.recanonicalize()
        } else {
            Ok(())
        }
    }

    pub fn codegen(&mut self, target: &str) -> Result<&Generated> {
        if self.stage == Stage::Complete {
            self.stage = Stage::Codegen;
        }
        match self.stage {
            Stage::Parse => bail!(StateError::NotParsed("codegen")),
            Stage::Canonicalize => bail!(StateError::NotCanonicalized("codegen")),
            _ => {}
        }
        let form = self
            .form
            .as_ref()
            .ok_or_else(|| anyhow!(StateError::NotCanonicalized("codegen")))?;

        let backend = exporters::backend(target, &self.settings)?;
        info!("generating code for {}", target);
        let generated = exporters::generate(form, backend)?;
        if self.settings.debug {
            debug!("generated {}:\n{}", target, generated);
        }
        self.generated = Some(generated);
        self.stage = Stage::Complete;
        self.generated
            .as_ref()
            .ok_or_else(|| anyhow!("no generated code"))
    }

    /// Guess the dimensions from the shapes of the parameters values.
    pub fn infer_dims(&self, params: &Params) -> Result<HashMap<String, usize>> {
        let program = self
            .program
            .as_ref()
            .ok_or_else(|| anyhow!(StateError::NotParsed("solve")))?;
        let mut dims = HashMap::new();
        for p in program.parameters.iter() {
            let value = match params.get(&p.name) {
                Some(v) => v,
                None => continue,
            };
            let found = [
                (p.shape.rows(), value.nrows()),
                (p.shape.cols(), value.ncols()),
            ];
            for (dim, size) in found {
                if let Some(name) = dim.as_symbol() {
                    match dims.insert(name.to_owned(), size) {
                        Some(other) if other != size => {
                            bail!(ConfigError::ConflictingDimension(
                                name.to_owned(),
                                other,
                                size
                            ))
                        }
                        _ => {}
                    }
                }
            }
        }
        trace!("inferred dimensions: {:?}", dims);
        Ok(dims)
    }

    /// Solve the current problem for the given parameters values, with the
    /// solver given to [`Compiler::with_solver`].
    pub fn solve(
        &mut self,
        params: &Params,
        dims: Option<HashMap<String, usize>>,
    ) -> Result<SolveResult> {
        if self.stage == Stage::Parse {
            bail!(StateError::NotParsed("solve"))
        }
        if self.solver.is_none() {
            bail!(ExternalError::MissingSolver)
        }

        let dims = match dims {
            Some(dims) => dims,
            None => self.infer_dims(params)?,
        };
        self.set_dims(dims)?;
        self.canonicalize()?;

        self.codegen("native")?;
        let program = self
            .generated
            .as_ref()
            .and_then(|g| g.native())
            .ok_or_else(|| anyhow!("native backend produced no program"))?;

        let data = program.prob2socp(params)?;
        let solver = self
            .solver
            .as_ref()
            .ok_or_else(|| anyhow!(ExternalError::MissingSolver))?;
        let solution = solver.solve(&data)?;
        let variables = program.socp2prob(&solution.x)?;
        let objval = program.objective_value(params, solution.info.pcost)?;
        info!("solved with status {}: {}", solution.info.status, objval);

        Ok(SolveResult {
            objval,
            variables,
            info: solution.info,
        })
    }
}
