pub mod dense;
mod names;

pub use dense::{params_from_json, Dense, Params};
pub use names::NameAllocator;

/// Prefix of the auxiliary variables introduced by canonicalization
pub const AUX_PREFIX: &str = "_t";
