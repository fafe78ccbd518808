//! Built-in validators

use super::ChangeValidator;
use crate::model::Change;
use crate::{Error, Result};

/// Structural checks every change must pass.
///
/// Rejects blank entity ids and field names and values whose JSON text
/// exceeds `max_value_bytes`.
#[derive(Clone, Debug)]
pub struct StructuralValidator {
    max_value_bytes: usize,
}

impl StructuralValidator {
    pub fn new(max_value_bytes: usize) -> Self {
        StructuralValidator { max_value_bytes }
    }
}

impl Default for StructuralValidator {
    fn default() -> Self {
        Self::new(64 * 1024)
    }
}

impl ChangeValidator for StructuralValidator {
    fn validate(&self, change: &Change) -> Result<()> {
        if change.entity_id.trim().is_empty() {
            return Err(Error::Validation(format!(
                "{} change has an empty entity id",
                change.entity_type
            )));
        }
        if change.field_name.trim().is_empty() {
            return Err(Error::Validation(format!(
                "change to {} has an empty field name",
                change.entity_id
            )));
        }

        let size = change.new_value.to_canonical().len();
        if size > self.max_value_bytes {
            return Err(Error::Validation(format!(
                "{}: value of {} bytes exceeds limit of {}",
                change.key(),
                size,
                self.max_value_bytes
            )));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "structural"
    }
}

/// Adapts a closure into a validator
pub struct FnValidator<F> {
    name: String,
    check: F,
}

impl<F> FnValidator<F>
where
    F: Fn(&Change) -> std::result::Result<(), String> + Send + Sync,
{
    pub fn new(name: impl Into<String>, check: F) -> Self {
        FnValidator {
            name: name.into(),
            check,
        }
    }
}

impl<F> ChangeValidator for FnValidator<F>
where
    F: Fn(&Change) -> std::result::Result<(), String> + Send + Sync,
{
    fn validate(&self, change: &Change) -> Result<()> {
        (self.check)(change)
            .map_err(|reason| Error::Validation(format!("{}: {}", change.key(), reason)))
    }

    fn name(&self) -> &str {
        &self.name
    }
}
