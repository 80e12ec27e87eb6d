use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::fmt;

use super::{
    deserialize_document, null_default, require, DecodeError, ObjectMeta, ResourceKind, DATE_FORMAT,
};

/// Namespace reported when the involved object has none
pub const UNKNOWN_NAMESPACE: &str = "???";

const NODE_AGENT: &str = "kubelet";

/// Event snapshot
///
/// `name`, `namespace` and `kind` describe the involved object, not the event
/// record itself.
#[derive(Debug, Clone)]
pub struct Event {
    pub name: String,
    pub namespace: String,
    pub kind: String,
    pub reason: String,
    pub message: String,
    pub first_seen: DateTime<Utc>,
    /// Never precedes `first_seen`
    pub last_seen: DateTime<Utc>,
    pub count: Option<u64>,
    pub component: Option<String>,
    /// Reporting host, set only when the node agent emitted the event
    pub node: Option<String>,
    raw: Value,
}

impl Event {
    pub(super) fn from_document(raw: Value) -> Result<Self, DecodeError> {
        const KIND: ResourceKind = ResourceKind::Event;
        let doc: EventDocument = deserialize_document(KIND, &raw)?;

        let first_seen = require(
            KIND,
            "firstTimestamp",
            doc.first_timestamp
                .or(doc.event_time)
                .or(doc.metadata.creation_timestamp),
        )?;
        let last_seen = doc
            .last_timestamp
            .map_or(first_seen, |last| last.max(first_seen));

        let (component, node) = match (doc.source.component, doc.reporting_component) {
            (Some(component), _) => {
                let node = doc.source.host.filter(|_| component == NODE_AGENT);
                (Some(component), node)
            }
            (None, Some(component)) => {
                let node = doc.reporting_instance.filter(|_| component == NODE_AGENT);
                (Some(component), node)
            }
            (None, None) => (None, None),
        };

        Ok(Self {
            name: doc.involved_object.name.unwrap_or_default(),
            namespace: doc
                .involved_object
                .namespace
                .unwrap_or_else(|| UNKNOWN_NAMESPACE.to_string()),
            kind: doc.involved_object.kind.unwrap_or_default(),
            reason: doc.reason.unwrap_or_default(),
            message: doc.message.unwrap_or_default(),
            first_seen,
            last_seen,
            count: doc.count,
            component,
            node,
            raw,
        })
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }

    pub fn involves_pod(&self) -> bool {
        self.kind == "Pod"
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}: [{}] on {}/{} - {}",
            self.last_seen.format(DATE_FORMAT),
            self.namespace,
            self.reason,
            self.kind,
            self.name,
            self.message
        )
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventDocument {
    #[serde(default, deserialize_with = "null_default")]
    metadata: ObjectMeta,
    #[serde(default, deserialize_with = "null_default")]
    involved_object: InvolvedObject,
    reason: Option<String>,
    message: Option<String>,
    count: Option<u64>,
    first_timestamp: Option<DateTime<Utc>>,
    last_timestamp: Option<DateTime<Utc>>,
    event_time: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "null_default")]
    source: EventSource,
    reporting_component: Option<String>,
    reporting_instance: Option<String>,
}

#[derive(Default, Deserialize)]
struct InvolvedObject {
    kind: Option<String>,
    name: Option<String>,
    namespace: Option<String>,
}

#[derive(Default, Deserialize)]
struct EventSource {
    component: Option<String>,
    host: Option<String>,
}
