//! Spec validation.
//!
//! Pure functions only: nothing here touches the store or blocks.

use crate::{IdlType, TaskDefineSpec, ValidationError};

/// The parts of a spec the controller interprets, after validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedSpec {
    /// Parsed IDL classification, if one was given.
    pub idl_type: Option<IdlType>,

    /// Name of the related image build.
    pub builder: String,
}

/// Check a spec for semantic correctness.
///
/// Rules, in order:
/// - `idlType`, when non-empty, must be one of "1", "2", "3".
/// - `relatedImage.builder` must be non-empty.
///
/// All other fields are unconstrained.
pub fn validate_spec(spec: &TaskDefineSpec) -> Result<ValidatedSpec, ValidationError> {
    let idl_type = spec.idl_type()?;

    if spec.related_image.builder.is_empty() {
        return Err(ValidationError::MissingBuilder);
    }

    Ok(ValidatedSpec {
        idl_type,
        builder: spec.related_image.builder.clone(),
    })
}
