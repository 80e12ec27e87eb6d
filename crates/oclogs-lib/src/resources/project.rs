use serde::Deserialize;
use serde_json::Value;
use std::fmt;

use super::{deserialize_document, null_default, require, DecodeError, ObjectMeta, ResourceKind};

/// Project (namespace) snapshot, only rendered on the console
#[derive(Debug, Clone)]
pub struct Project {
    pub name: String,
    pub phase: String,
    raw: Value,
}

impl Project {
    pub(super) fn from_document(raw: Value) -> Result<Self, DecodeError> {
        const KIND: ResourceKind = ResourceKind::Project;
        let doc: ProjectDocument = deserialize_document(KIND, &raw)?;

        Ok(Self {
            name: require(KIND, "metadata.name", doc.metadata.name)?,
            phase: doc.status.phase.unwrap_or_else(|| "Unknown".to_string()),
            raw,
        })
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }
}

impl fmt::Display for Project {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: [{}]", self.name, self.phase)
    }
}

#[derive(Deserialize)]
struct ProjectDocument {
    #[serde(default, deserialize_with = "null_default")]
    metadata: ObjectMeta,
    #[serde(default, deserialize_with = "null_default")]
    status: ProjectStatus,
}

#[derive(Default, Deserialize)]
struct ProjectStatus {
    phase: Option<String>,
}
