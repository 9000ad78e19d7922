//! HTTP response types.

use serde::Serialize;

use taskdefine_core::TaskDefine;

/// One row of the TaskDefine listing.
#[derive(Debug, Serialize)]
pub struct TaskDefineSummary {
    pub namespace: String,
    pub name: String,
    pub state: String,
    pub message: String,
    pub last_updated: String,
    pub deleting: bool,
}

impl From<&TaskDefine> for TaskDefineSummary {
    fn from(object: &TaskDefine) -> Self {
        Self {
            namespace: object.metadata.namespace.clone(),
            name: object.metadata.name.clone(),
            state: object
                .status
                .state
                .map(|s| s.to_string())
                .unwrap_or_default(),
            message: object.status.message.clone(),
            last_updated: object.status.last_updated.clone(),
            deleting: object.is_being_deleted(),
        }
    }
}

/// Error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}
