//! Pluggable change validation

mod rules;
mod traits;

pub use rules::{FnValidator, StructuralValidator};
pub use traits::ChangeValidator;
