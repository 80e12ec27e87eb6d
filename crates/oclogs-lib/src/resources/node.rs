use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use super::{deserialize_document, null_default, require, DecodeError, ObjectMeta, ResourceKind};

/// Node type reported when no label identifies one
pub const UNKNOWN_NODE_TYPE: &str = "unknown";

const TYPE_LABEL: &str = "type";
const ROLE_LABEL_PREFIX: &str = "node-role.kubernetes.io/";

/// Node snapshot
///
/// `node_type` and `ready` are derived once from the full document, so a
/// snapshot never mixes facts from different observations.
#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub node_type: String,
    pub allocatable: BTreeMap<String, String>,
    pub ready: bool,
    pub taints: Vec<Taint>,
    raw: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Taint {
    pub key: String,
    pub value: Option<String>,
    pub effect: String,
}

impl Node {
    pub(super) fn from_document(raw: Value) -> Result<Self, DecodeError> {
        const KIND: ResourceKind = ResourceKind::Node;
        let doc: NodeDocument = deserialize_document(KIND, &raw)?;

        let node_type = node_type(&doc.metadata.labels);
        let ready = doc
            .status
            .conditions
            .iter()
            .find(|condition| condition.condition_type == "Ready")
            .is_some_and(|condition| condition.status == "True");

        Ok(Self {
            name: require(KIND, "metadata.name", doc.metadata.name)?,
            node_type,
            allocatable: doc.status.allocatable,
            ready,
            taints: doc.spec.taints,
            raw,
        })
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }

    pub fn is_compute(&self) -> bool {
        self.node_type == "compute"
    }
}

/// Explicit `type` label, else the role of a `node-role.kubernetes.io/<role>` label
fn node_type(labels: &BTreeMap<String, String>) -> String {
    if let Some(node_type) = labels.get(TYPE_LABEL) {
        return node_type.clone();
    }

    labels
        .keys()
        .filter_map(|key| key.strip_prefix(ROLE_LABEL_PREFIX))
        .find(|role| !role.is_empty())
        .unwrap_or(UNKNOWN_NODE_TYPE)
        .to_string()
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let readiness = if self.ready { "Ready" } else { "NotReady" };
        write!(f, "{}: [{}] {}", self.name, self.node_type, readiness)
    }
}

#[derive(Deserialize)]
struct NodeDocument {
    #[serde(default, deserialize_with = "null_default")]
    metadata: ObjectMeta,
    #[serde(default, deserialize_with = "null_default")]
    spec: NodeSpecDocument,
    #[serde(default, deserialize_with = "null_default")]
    status: NodeStatusDocument,
}

#[derive(Default, Deserialize)]
struct NodeSpecDocument {
    #[serde(default, deserialize_with = "null_default")]
    taints: Vec<Taint>,
}

#[derive(Default, Deserialize)]
struct NodeStatusDocument {
    #[serde(default, deserialize_with = "null_default")]
    allocatable: BTreeMap<String, String>,
    #[serde(default, deserialize_with = "null_default")]
    conditions: Vec<NodeCondition>,
}

#[derive(Deserialize)]
struct NodeCondition {
    #[serde(rename = "type")]
    condition_type: String,
    status: String,
}
