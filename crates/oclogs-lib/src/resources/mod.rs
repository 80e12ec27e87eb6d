//! Typed resource snapshots decoded from watch stream documents
//!
//! Every watch record carries an untyped `object` document. The feed knows
//! which kind it is watching and decodes the document into one of the closed
//! set of [`Resource`] variants. Snapshots are immutable values: a fresh one is
//! built for every record and dropped after dispatch.

mod event;
mod node;
mod pod;
mod project;

pub use event::{Event, UNKNOWN_NAMESPACE};
pub use node::{Node, Taint, UNKNOWN_NODE_TYPE};
pub use pod::{Container, ContainerState, Pod, PodPhase, ResourceRequirements};
pub use project::Project;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Timestamp layout used in every rendered line
pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Errors raised while turning a raw document into a typed snapshot
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed {kind} document: {source}")]
    Malformed {
        kind: ResourceKind,
        #[source]
        source: serde_json::Error,
    },

    #[error("{kind} document has no {field}")]
    MissingField {
        kind: ResourceKind,
        field: &'static str,
    },
}

/// Resource kinds that can be watched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Pod,
    Event,
    Node,
    Project,
}

impl ResourceKind {
    /// All watchable kinds
    pub const ALL: [ResourceKind; 4] = [
        ResourceKind::Pod,
        ResourceKind::Event,
        ResourceKind::Node,
        ResourceKind::Project,
    ];

    /// Plural path segment used by the watch API
    pub fn plural(&self) -> &'static str {
        match self {
            ResourceKind::Pod => "pods",
            ResourceKind::Event => "events",
            ResourceKind::Node => "nodes",
            ResourceKind::Project => "projects",
        }
    }

    /// Whether a namespace scope applies to this kind
    pub fn is_namespaced(&self) -> bool {
        matches!(self, ResourceKind::Pod | ResourceKind::Event)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.plural())
    }
}

/// A decoded resource snapshot
#[derive(Debug, Clone)]
pub enum Resource {
    Pod(Pod),
    Event(Event),
    Node(Node),
    Project(Project),
}

impl Resource {
    /// Decode a raw watch `object` as the given kind
    pub fn decode(kind: ResourceKind, raw: Value) -> Result<Self, DecodeError> {
        let resource = match kind {
            ResourceKind::Pod => Resource::Pod(Pod::from_document(raw)?),
            ResourceKind::Event => Resource::Event(Event::from_document(raw)?),
            ResourceKind::Node => Resource::Node(Node::from_document(raw)?),
            ResourceKind::Project => Resource::Project(Project::from_document(raw)?),
        };
        Ok(resource)
    }

    pub fn kind(&self) -> ResourceKind {
        match self {
            Resource::Pod(_) => ResourceKind::Pod,
            Resource::Event(_) => ResourceKind::Event,
            Resource::Node(_) => ResourceKind::Node,
            Resource::Project(_) => ResourceKind::Project,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Resource::Pod(pod) => &pod.name,
            Resource::Event(event) => &event.name,
            Resource::Node(node) => &node.name,
            Resource::Project(project) => &project.name,
        }
    }

    pub fn namespace(&self) -> Option<&str> {
        match self {
            Resource::Pod(pod) => Some(&pod.namespace),
            Resource::Event(event) => Some(&event.namespace),
            Resource::Node(_) | Resource::Project(_) => None,
        }
    }

    /// When the resource was last reported, for kinds that carry it
    pub fn last_seen(&self) -> Option<DateTime<Utc>> {
        match self {
            Resource::Event(event) => Some(event.last_seen),
            _ => None,
        }
    }

    /// The document this snapshot was decoded from
    pub fn raw(&self) -> &Value {
        match self {
            Resource::Pod(pod) => pod.raw(),
            Resource::Event(event) => event.raw(),
            Resource::Node(node) => node.raw(),
            Resource::Project(project) => project.raw(),
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Pod(pod) => pod.fmt(f),
            Resource::Event(event) => event.fmt(f),
            Resource::Node(node) => node.fmt(f),
            Resource::Project(project) => project.fmt(f),
        }
    }
}

/// Metadata block shared by every document
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectMeta {
    name: Option<String>,
    namespace: Option<String>,
    creation_timestamp: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "null_default")]
    labels: BTreeMap<String, String>,
}

fn deserialize_document<'a, T: Deserialize<'a>>(
    kind: ResourceKind,
    raw: &'a Value,
) -> Result<T, DecodeError> {
    T::deserialize(raw).map_err(|source| DecodeError::Malformed { kind, source })
}

/// Reads an explicit `null` the same as a missing field
fn null_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn require<T>(kind: ResourceKind, field: &'static str, value: Option<T>) -> Result<T, DecodeError> {
    value.ok_or(DecodeError::MissingField { kind, field })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_paths() {
        assert_eq!(ResourceKind::Pod.plural(), "pods");
        assert_eq!(ResourceKind::Project.to_string(), "projects");
        assert!(ResourceKind::Event.is_namespaced());
        assert!(!ResourceKind::Node.is_namespaced());
    }

    #[test]
    fn test_decode_dispatches_on_kind() {
        let raw = json!({
            "metadata": {"name": "team-a"},
            "status": {"phase": "Active"}
        });

        let resource = Resource::decode(ResourceKind::Project, raw.clone()).unwrap();
        assert_eq!(resource.kind(), ResourceKind::Project);
        assert_eq!(resource.name(), "team-a");
        assert_eq!(resource.namespace(), None);
        assert_eq!(resource.raw(), &raw);

        // The same document is not a pod
        assert!(Resource::decode(ResourceKind::Pod, raw).is_err());
    }

    #[test]
    fn test_decode_rejects_non_object() {
        let err = Resource::decode(ResourceKind::Node, json!("nope")).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::Malformed {
                kind: ResourceKind::Node,
                ..
            }
        ));
    }
}
