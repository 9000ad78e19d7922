//! Closed enumerations used by the TaskDefine schema.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::CoreError;

/// Observed state of a TaskDefine, as recorded in `status.state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskDefineState {
    /// Object seen but not validated yet.
    Pending,
    /// The build collaborator is producing an image.
    Building,
    /// Spec is valid.
    Ready,
    /// The build collaborator reported a failure.
    Failed,
    /// Spec failed validation; `status.message` says why.
    Invalid,
}

impl TaskDefineState {
    /// Wire spelling of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Building => "Building",
            Self::Ready => "Ready",
            Self::Failed => "Failed",
            Self::Invalid => "Invalid",
        }
    }

    /// All states, in declaration order.
    pub fn all() -> [Self; 5] {
        [
            Self::Pending,
            Self::Building,
            Self::Ready,
            Self::Failed,
            Self::Invalid,
        ]
    }
}

impl fmt::Display for TaskDefineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of the IDL a TaskDefine describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdlType {
    /// `"1"`: data synchronizer.
    #[serde(rename = "1")]
    Synchronizer,
    /// `"2"`: API.
    #[serde(rename = "2")]
    Api,
    /// `"3"`: UI.
    #[serde(rename = "3")]
    Ui,
}

impl IdlType {
    /// Wire code of the classification.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Synchronizer => "1",
            Self::Api => "2",
            Self::Ui => "3",
        }
    }
}

impl fmt::Display for IdlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for IdlType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1" => Ok(Self::Synchronizer),
            "2" => Ok(Self::Api),
            "3" => Ok(Self::Ui),
            other => Err(CoreError::UnknownIdlType(other.to_string())),
        }
    }
}
