#[macro_use]
extern crate pest_derive;

pub mod compiler;
pub mod driver;
pub mod errors;
pub mod exporters;
pub mod pretty;
pub mod structs;
pub mod transformer;
pub mod utils;

#[cfg(test)]
mod tests;

pub use compiler::{parse, Program};
pub use driver::{Compiler, Settings, SolveResult, Solution, Solver, SolverInfo, Stage};
pub use exporters::native::{NativeProgram, SocpData};
pub use exporters::Generated;
pub use structs::{Dense, Params};
pub use transformer::SocpForm;
