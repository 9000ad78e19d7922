//! Core domain errors.

use thiserror::Error;

/// Core domain errors for TaskDefine.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Unknown IDL classification string.
    #[error("Unknown IdlType: {0}")]
    UnknownIdlType(String),
}

/// Reasons a `TaskDefineSpec` is rejected.
///
/// The `Display` output is what ends up in `status.message`, so the wording
/// is user-facing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// `spec.idlType` is set to something other than 1, 2 or 3.
    #[error("invalid IdlType: {0}, must be one of: 1, 2, 3")]
    InvalidIdlType(String),

    /// `spec.relatedImage.builder` is empty.
    #[error("relatedImage.builder is required")]
    MissingBuilder,
}
