//! The TaskDefine resource schema.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{IdlType, ObjectKey, ObjectUid, ResourceVersion, TaskDefineState, ValidationError};

/// Deletion guard the controller places on every live TaskDefine.
///
/// While present, the store must not physically remove the object.
pub const FINALIZER: &str = "taskdefine.lct.kube.inspect/finalizer";

/// Namespace assumed for the related image build when none is given.
pub const DEFAULT_IMAGE_NAMESPACE: &str = "default";

fn default_image_namespace() -> String {
    DEFAULT_IMAGE_NAMESPACE.to_string()
}

/// Object metadata managed by the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// Namespace the object lives in.
    pub namespace: String,

    /// Object name.
    pub name: String,

    /// Assigned by the store at creation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<ObjectUid>,

    /// Optimistic-concurrency token; writes with a stale value are rejected.
    #[serde(default, skip_serializing_if = "ResourceVersion::is_empty")]
    pub resource_version: ResourceVersion,

    /// When the store accepted the object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,

    /// Set once deletion has been requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,

    /// Deletion guards. Treated as a set.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finalizers: Vec<String>,
}

/// Reference to the image build a TaskDefine depends on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelatedImage {
    /// Name of the image build object. Required.
    #[serde(default)]
    pub builder: String,

    /// Namespace of the image build object.
    #[serde(default = "default_image_namespace")]
    pub namespace: String,

    /// Image build version.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,

    /// Image digest.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub digest: String,
}

impl Default for RelatedImage {
    fn default() -> Self {
        Self {
            builder: String::new(),
            namespace: default_image_namespace(),
            version: String::new(),
            digest: String::new(),
        }
    }
}

/// Desired state of a TaskDefine, authored outside the controller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDefineSpec {
    /// IDL classification code as authored ("1", "2" or "3"; empty means unset).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub idl_type: String,

    /// IDL identifier.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub idl_code: String,

    /// IDL name.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub idl_name: String,

    /// IDL version.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub idl_version: String,

    /// Image build this task depends on.
    #[serde(default)]
    pub related_image: RelatedImage,

    /// User-defined task configuration. Opaque to the controller.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub definition: String,
}

impl TaskDefineSpec {
    /// Parse the authored IDL classification.
    ///
    /// An empty field is accepted as "not set".
    pub fn idl_type(&self) -> Result<Option<IdlType>, ValidationError> {
        if self.idl_type.is_empty() {
            return Ok(None);
        }
        self.idl_type
            .parse()
            .map(Some)
            .map_err(|_| ValidationError::InvalidIdlType(self.idl_type.clone()))
    }
}

/// Image summary written by the build collaborator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageStatus {
    /// Full repository URL.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub repository: String,

    /// Image tag.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tag: String,

    /// Image digest.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub digest: String,

    /// Complete pull string.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pull_string: String,
}

/// Build summary written by the build collaborator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildStatus {
    /// Full image reference.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,

    /// Build timestamp.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub time: String,

    /// Source repository URL.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub repo: String,

    /// Source branch.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub branch: String,
}

/// Observed state of a TaskDefine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDefineStatus {
    /// Current state. `None` until the controller first writes status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<TaskDefineState>,

    /// Human-readable explanation of `state`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,

    /// When the controller last wrote status (RFC 3339).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_updated: String,

    /// When the build collaborator last refreshed `image`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_update_time: String,

    /// Image produced by the related build.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageStatus>,

    /// Latest build of the related image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<BuildStatus>,
}

/// A TaskDefine object as held by the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskDefine {
    /// Store-managed metadata.
    pub metadata: ObjectMeta,

    /// Desired state.
    #[serde(default)]
    pub spec: TaskDefineSpec,

    /// Observed state.
    #[serde(default)]
    pub status: TaskDefineStatus,
}

impl TaskDefine {
    /// Create a new TaskDefine with empty status.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, spec: TaskDefineSpec) -> Self {
        Self {
            metadata: ObjectMeta {
                namespace: namespace.into(),
                name: name.into(),
                ..ObjectMeta::default()
            },
            spec,
            status: TaskDefineStatus::default(),
        }
    }

    /// Identity of this object.
    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(&self.metadata.namespace, &self.metadata.name)
    }

    /// Returns true once deletion has been requested.
    pub fn is_being_deleted(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Check whether a finalizer is present.
    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.metadata.finalizers.iter().any(|f| f == finalizer)
    }

    /// Add a finalizer. Returns false if it was already present.
    pub fn add_finalizer(&mut self, finalizer: &str) -> bool {
        if self.has_finalizer(finalizer) {
            return false;
        }
        self.metadata.finalizers.push(finalizer.to_string());
        true
    }

    /// Remove a finalizer. Returns false if it was not present.
    pub fn remove_finalizer(&mut self, finalizer: &str) -> bool {
        let before = self.metadata.finalizers.len();
        self.metadata.finalizers.retain(|f| f != finalizer);
        self.metadata.finalizers.len() != before
    }

    /// Builder method to set the finalizer list (useful for testing).
    pub fn with_finalizers<I, S>(mut self, finalizers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.metadata.finalizers = finalizers.into_iter().map(Into::into).collect();
        self
    }

    /// Builder method to set the status (useful for testing).
    pub fn with_status(mut self, status: TaskDefineStatus) -> Self {
        self.status = status;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(builder: &str) -> TaskDefineSpec {
        TaskDefineSpec {
            related_image: RelatedImage {
                builder: builder.to_string(),
                ..RelatedImage::default()
            },
            ..TaskDefineSpec::default()
        }
    }

    #[test]
    fn test_finalizer_set_semantics() {
        let mut td = TaskDefine::new("default", "td", spec("b"));
        assert!(!td.has_finalizer(FINALIZER));

        assert!(td.add_finalizer(FINALIZER));
        assert!(!td.add_finalizer(FINALIZER));
        assert_eq!(td.metadata.finalizers.len(), 1);

        assert!(td.remove_finalizer(FINALIZER));
        assert!(!td.remove_finalizer(FINALIZER));
        assert!(td.metadata.finalizers.is_empty());
    }

    #[test]
    fn test_remove_keeps_foreign_finalizers() {
        let mut td =
            TaskDefine::new("default", "td", spec("b")).with_finalizers(["other/guard", FINALIZER]);
        td.remove_finalizer(FINALIZER);
        assert_eq!(td.metadata.finalizers, vec!["other/guard".to_string()]);
    }

    #[test]
    fn test_deserialize_manifest() {
        let json = r#"{
            "metadata": {"namespace": "team-a", "name": "sync-orders"},
            "spec": {
                "idlType": "1",
                "idlName": "orders",
                "relatedImage": {"builder": "img-builder-1"},
                "definition": "{\"cron\":\"*/5 * * * *\"}"
            }
        }"#;
        let td: TaskDefine = serde_json::from_str(json).unwrap();

        assert_eq!(td.key(), ObjectKey::new("team-a", "sync-orders"));
        assert_eq!(td.spec.related_image.namespace, "default");
        assert_eq!(td.spec.idl_type().unwrap(), Some(IdlType::Synchronizer));
        assert!(td.status.state.is_none());
        assert!(!td.is_being_deleted());
    }

    #[test]
    fn test_unknown_state_is_rejected_at_the_boundary() {
        let json = r#"{
            "metadata": {"namespace": "a", "name": "b"},
            "status": {"state": "Running"}
        }"#;
        assert!(serde_json::from_str::<TaskDefine>(json).is_err());
    }

    #[test]
    fn test_status_serializes_camel_case() {
        let status = TaskDefineStatus {
            state: Some(TaskDefineState::Ready),
            message: "Resource is ready".to_string(),
            last_updated: "2024-05-01T10:00:00Z".to_string(),
            image: Some(ImageStatus {
                pull_string: "registry/x:1".to_string(),
                ..ImageStatus::default()
            }),
            ..TaskDefineStatus::default()
        };
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["state"], "Ready");
        assert_eq!(value["lastUpdated"], "2024-05-01T10:00:00Z");
        assert_eq!(value["image"]["pullString"], "registry/x:1");
        assert!(value.get("build").is_none());
    }
}
