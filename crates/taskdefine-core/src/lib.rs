//! TaskDefine Core Domain Types
//!
//! This crate contains pure domain types with no dependencies on:
//! - The resource store
//! - Network/HTTP
//! - Runtime specifics
//!
//! All types here describe the `TaskDefine` resource and the rules the
//! controller applies to it.

pub mod error;
pub mod ids;
pub mod resource;
pub mod status;
pub mod validation;

// Re-export commonly used types
pub use error::{CoreError, ValidationError};
pub use ids::{ObjectKey, ObjectUid, ResourceVersion};
pub use resource::{
    BuildStatus, ImageStatus, ObjectMeta, RelatedImage, TaskDefine, TaskDefineSpec,
    TaskDefineStatus, FINALIZER,
};
pub use status::{IdlType, TaskDefineState};
pub use validation::{validate_spec, ValidatedSpec};
