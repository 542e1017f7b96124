//! Code generation from canonicalized problems.
//!
//! A backend receives the stuffing instructions of a [`SocpForm`] one by
//! one, and turns them into a pair of functions: one assembling the solver
//! input from the parameters values, the other one recovering the problem
//! variables from the solver output.
use std::collections::HashMap;
use std::fmt;
use std::ops::Range;

use anyhow::*;
use lazy_static::lazy_static;
use log::*;
use maplit::hashmap;

use crate::driver::Settings;
use crate::errors::ConfigError;
use crate::transformer::{Coeff, SocpForm, Stuffing, Target};

pub mod native;
pub mod python;

use native::{NativeCodegen, NativeProgram};
use python::PythonCodegen;

pub trait Codegen {
    /// The name of the target language
    fn target(&self) -> &'static str;

    fn functions_setup(&mut self, form: &SocpForm) -> Result<()>;

    fn stuff_c(&mut self, rows: Range<usize>, coeff: &Coeff) -> Result<()>;
    fn stuff_b(&mut self, rows: Range<usize>, coeff: &Coeff) -> Result<()>;
    fn stuff_h(&mut self, rows: Range<usize>, coeff: &Coeff, stride: Option<usize>) -> Result<()>;
    fn stuff_g(
        &mut self,
        rows: Range<usize>,
        cols: Range<usize>,
        coeff: &Coeff,
        row_stride: usize,
    ) -> Result<()>;
    fn stuff_a(
        &mut self,
        rows: Range<usize>,
        cols: Range<usize>,
        coeff: &Coeff,
        row_stride: usize,
    ) -> Result<()>;

    fn functions_return(&mut self, form: &SocpForm) -> Result<()>;

    fn finish(self: Box<Self>) -> Result<Generated>;

    /// Spread a scalar coefficient over `n` rows, so that its shape matches
    /// the block it is stuffed in.
    fn broadcast(&self, n: usize, coeff: &Coeff) -> Coeff {
        if n > 1 && coeff.is_scalar() {
            Coeff::Ones(n).mul(coeff.clone())
        } else {
            coeff.clone()
        }
    }

    fn stuff(&mut self, s: &Stuffing) -> Result<()> {
        let cols = || {
            s.cols
                .clone()
                .ok_or_else(|| anyhow!("no columns given to stuff {}", s.target))
        };
        match s.target {
            Target::C => self.stuff_c(s.rows.clone(), &s.coeff),
            Target::B => self.stuff_b(s.rows.clone(), &s.coeff),
            Target::H => self.stuff_h(
                s.rows.clone(),
                &s.coeff,
                (s.row_stride > 1).then_some(s.row_stride),
            ),
            Target::G => self.stuff_g(s.rows.clone(), cols()?, &s.coeff, s.row_stride),
            Target::A => self.stuff_a(s.rows.clone(), cols()?, &s.coeff, s.row_stride),
        }
    }
}

/// The output of a backend.
#[derive(Debug, Clone)]
pub enum Generated {
    Source { target: &'static str, code: String },
    Native(NativeProgram),
}
impl Generated {
    pub fn target(&self) -> &'static str {
        match self {
            Generated::Source { target, .. } => target,
            Generated::Native(_) => "native",
        }
    }
    pub fn source(&self) -> Option<&str> {
        match self {
            Generated::Source { code, .. } => Some(code),
            Generated::Native(_) => None,
        }
    }
    pub fn native(&self) -> Option<&NativeProgram> {
        match self {
            Generated::Native(p) => Some(p),
            Generated::Source { .. } => None,
        }
    }
}
impl fmt::Display for Generated {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Generated::Source { code, .. } => write!(f, "{}", code),
            Generated::Native(p) => write!(f, "{}", p),
        }
    }
}

type Constructor = fn(&Settings) -> Box<dyn Codegen>;

lazy_static! {
    pub static ref TARGETS: HashMap<&'static str, Constructor> = hashmap! {
        "python" => PythonCodegen::boxed as Constructor,
        "native" => NativeCodegen::boxed as Constructor,
    };
}

/// The names of the available targets, sorted.
pub fn targets() -> Vec<String> {
    let mut r = TARGETS.keys().map(|k| k.to_string()).collect::<Vec<_>>();
    r.sort();
    r
}

pub fn backend(target: &str, settings: &Settings) -> Result<Box<dyn Codegen>> {
    TARGETS
        .get(target)
        .map(|make| make(settings))
        .ok_or_else(|| {
            anyhow!(ConfigError::UnknownTarget {
                name: target.to_owned(),
                valid: targets(),
            })
        })
}

/// Feed the whole of `form` to `backend`.
pub fn generate(form: &SocpForm, mut backend: Box<dyn Codegen>) -> Result<Generated> {
    debug!(
        "generating {} from {} instructions",
        backend.target(),
        form.instructions.len()
    );
    backend.functions_setup(form)?;
    for s in form.instructions.iter() {
        backend
            .stuff(s)
            .with_context(|| anyhow!("while stuffing {}", s))?;
    }
    backend.functions_return(form)?;
    backend.finish()
}
