use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use super::{
    deserialize_document, null_default, require, DecodeError, ObjectMeta, ResourceKind, DATE_FORMAT,
};

/// Pod lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    #[default]
    #[serde(other)]
    Unknown,
}

impl fmt::Display for PodPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let phase = match self {
            PodPhase::Pending => "Pending",
            PodPhase::Running => "Running",
            PodPhase::Succeeded => "Succeeded",
            PodPhase::Failed => "Failed",
            PodPhase::Unknown => "Unknown",
        };
        f.write_str(phase)
    }
}

/// Pod snapshot
#[derive(Debug, Clone)]
pub struct Pod {
    pub name: String,
    pub namespace: String,
    /// Node the pod is scheduled on, `None` while unscheduled
    pub node: Option<String>,
    pub status: PodPhase,
    pub started: DateTime<Utc>,
    pub containers: Vec<Container>,
    raw: Value,
}

/// Requests and limits of one container, as quantity strings
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ResourceRequirements {
    pub requests: Option<BTreeMap<String, String>>,
    pub limits: Option<BTreeMap<String, String>>,
}

impl ResourceRequirements {
    /// Requested quantity for a resource name, if any
    pub fn request(&self, resource: &str) -> Option<&str> {
        self.requests
            .as_ref()
            .and_then(|requests| requests.get(resource))
            .map(String::as_str)
    }

    /// Limit quantity for a resource name, if any
    pub fn limit(&self, resource: &str) -> Option<&str> {
        self.limits
            .as_ref()
            .and_then(|limits| limits.get(resource))
            .map(String::as_str)
    }
}

/// Current state of a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerState {
    Waiting {
        reason: Option<String>,
        message: Option<String>,
    },
    Running {
        started_at: Option<DateTime<Utc>>,
    },
    Terminated {
        reason: Option<String>,
        exit_code: i32,
        message: Option<String>,
        started_at: Option<DateTime<Utc>>,
        finished_at: Option<DateTime<Utc>>,
    },
}

impl ContainerState {
    pub fn name(&self) -> &'static str {
        match self {
            ContainerState::Waiting { .. } => "waiting",
            ContainerState::Running { .. } => "running",
            ContainerState::Terminated { .. } => "terminated",
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            ContainerState::Waiting { reason, .. } | ContainerState::Terminated { reason, .. } => {
                reason.as_deref()
            }
            ContainerState::Running { .. } => None,
        }
    }
}

/// Container of a pod, joined from the pod spec and its status entry
#[derive(Debug, Clone)]
pub struct Container {
    pub name: String,
    pub resources: ResourceRequirements,
    /// `None` until the kubelet reports a status for the container
    pub state: Option<ContainerState>,
}

impl Container {
    /// Termination reason and finish time, when the container has terminated
    pub fn termination(&self) -> Option<(Option<&str>, Option<DateTime<Utc>>)> {
        match &self.state {
            Some(ContainerState::Terminated {
                reason,
                finished_at,
                ..
            }) => Some((reason.as_deref(), *finished_at)),
            _ => None,
        }
    }
}

impl Pod {
    pub(super) fn from_document(raw: Value) -> Result<Self, DecodeError> {
        const KIND: ResourceKind = ResourceKind::Pod;
        let doc: PodDocument = deserialize_document(KIND, &raw)?;

        let mut statuses: BTreeMap<String, ContainerStateDocument> = doc
            .status
            .container_statuses
            .into_iter()
            .map(|status| (status.name, status.state))
            .collect();

        let containers = doc
            .spec
            .containers
            .into_iter()
            .map(|spec| {
                let state = statuses.remove(&spec.name).and_then(ContainerStateDocument::into_state);
                Container {
                    name: spec.name,
                    resources: spec.resources,
                    state,
                }
            })
            .collect();

        Ok(Self {
            name: require(KIND, "metadata.name", doc.metadata.name)?,
            namespace: require(KIND, "metadata.namespace", doc.metadata.namespace)?,
            node: doc.spec.node_name.filter(|node| !node.is_empty()),
            status: doc.status.phase.unwrap_or_default(),
            started: require(
                KIND,
                "metadata.creationTimestamp",
                doc.metadata.creation_timestamp,
            )?,
            containers,
            raw,
        })
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }

    pub fn container(&self, name: &str) -> Option<&Container> {
        self.containers.iter().find(|c| c.name == name)
    }
}

impl PartialEq for Pod {
    fn eq(&self, other: &Self) -> bool {
        self.namespace == other.namespace && self.name == other.name && self.status == other.status
    }
}

impl fmt::Display for Pod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}: [{}] {}",
            self.started.format(DATE_FORMAT),
            self.namespace,
            self.status,
            self.name
        )
    }
}

#[derive(Deserialize)]
struct PodDocument {
    #[serde(default, deserialize_with = "null_default")]
    metadata: ObjectMeta,
    spec: PodSpecDocument,
    #[serde(default, deserialize_with = "null_default")]
    status: PodStatusDocument,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PodSpecDocument {
    node_name: Option<String>,
    containers: Vec<ContainerSpecDocument>,
}

#[derive(Deserialize)]
struct ContainerSpecDocument {
    name: String,
    #[serde(default, deserialize_with = "null_default")]
    resources: ResourceRequirements,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PodStatusDocument {
    phase: Option<PodPhase>,
    #[serde(default, deserialize_with = "null_default")]
    container_statuses: Vec<ContainerStatusDocument>,
}

#[derive(Deserialize)]
struct ContainerStatusDocument {
    name: String,
    #[serde(default, deserialize_with = "null_default")]
    state: ContainerStateDocument,
}

#[derive(Default, Deserialize)]
struct ContainerStateDocument {
    waiting: Option<WaitingDocument>,
    running: Option<RunningDocument>,
    terminated: Option<TerminatedDocument>,
}

impl ContainerStateDocument {
    fn into_state(self) -> Option<ContainerState> {
        if let Some(waiting) = self.waiting {
            return Some(ContainerState::Waiting {
                reason: waiting.reason,
                message: waiting.message,
            });
        }
        if let Some(running) = self.running {
            return Some(ContainerState::Running {
                started_at: running.started_at,
            });
        }
        self.terminated.map(|terminated| ContainerState::Terminated {
            reason: terminated.reason,
            exit_code: terminated.exit_code,
            message: terminated.message,
            started_at: terminated.started_at,
            finished_at: terminated.finished_at,
        })
    }
}

#[derive(Deserialize)]
struct WaitingDocument {
    reason: Option<String>,
    message: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunningDocument {
    started_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TerminatedDocument {
    reason: Option<String>,
    #[serde(default, deserialize_with = "null_default")]
    exit_code: i32,
    message: Option<String>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}
