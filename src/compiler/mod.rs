pub use atoms::{Atom, ATOMS};
pub use node::{Comparison, Expression, LeafKind, Node, RelOp};
pub use parser::parse;
pub use program::{Declaration, Objective, Program, Sense};
pub use types::{Attributes, Curvature, Dim, Monotonicity, Shape, Sign};

pub mod atoms;
pub mod fold;
mod node;
mod parser;
mod program;
mod types;
