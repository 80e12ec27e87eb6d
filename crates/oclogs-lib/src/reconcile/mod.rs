//! Metrics reconciliation engine
//!
//! Keeps the request/limit gauges of running containers and the allocatable
//! gauges of ready nodes consistent with a population that is only ever
//! described by watch deltas.
//!
//! The watch feeds never deliver a usable delete, so the engine remembers,
//! per pod name, the namespace, node and containers it last wrote series for.
//! Two event reasons act as deletion signals: `Killing` on a pod, and
//! `SuccessfulDelete` with a `Deleted pod: <name>` message. A pod that leaves
//! without emitting either keeps its series.
//!
//! One engine is shared by the pod, event and node feeds. All state and every
//! gauge write sit behind a single mutex.

mod gauges;

#[cfg(test)]
mod tests;

pub use gauges::{
    ContainerLabels, ContainerResources, ResourceGauges, NODE_METRIC_PREFIX, POD_METRIC_PREFIX,
};

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, warn};

use crate::dedup::DedupCache;
use crate::observability::{StructuredLogger, WatcherMetrics};
use crate::observer::Observer;
use crate::quantity::{self, QuantityError};
use crate::resources::{Container, Event, Node, Pod, PodPhase, Resource, ResourceKind};

const KILLING_REASON: &str = "Killing";
const SUCCESSFUL_DELETE_REASON: &str = "SuccessfulDelete";
const DELETED_POD_PREFIX: &str = "Deleted pod:";

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("node {node} has no allocatable {resource}")]
    MissingAllocatable {
        node: String,
        resource: &'static str,
    },

    #[error("node {node} allocatable {resource}: {source}")]
    Quantity {
        node: String,
        resource: &'static str,
        #[source]
        source: QuantityError,
    },
}

#[derive(Default)]
struct EngineState {
    containers_by_pod: HashMap<String, Vec<String>>,
    namespace_by_pod: HashMap<String, String>,
    node_by_pod: HashMap<String, String>,
    nodes_by_name: HashMap<String, Node>,
}

impl EngineState {
    /// Label sets last written for `pod`
    fn recorded_labels(&self, pod: &str) -> Vec<ContainerLabels> {
        let (Some(containers), Some(namespace), Some(node)) = (
            self.containers_by_pod.get(pod),
            self.namespace_by_pod.get(pod),
            self.node_by_pod.get(pod),
        ) else {
            return Vec::new();
        };

        containers
            .iter()
            .map(|container| ContainerLabels {
                node: node.clone(),
                container: container.clone(),
                pod: pod.to_string(),
                namespace: namespace.clone(),
            })
            .collect()
    }

    fn record(&mut self, pod: &Pod, node: &str) {
        let containers = pod.containers.iter().map(|c| c.name.clone()).collect();
        self.containers_by_pod.insert(pod.name.clone(), containers);
        self.namespace_by_pod
            .insert(pod.name.clone(), pod.namespace.clone());
        self.node_by_pod.insert(pod.name.clone(), node.to_string());
    }

    fn forget(&mut self, pod: &str) -> bool {
        let known = self.containers_by_pod.remove(pod).is_some();
        self.namespace_by_pod.remove(pod);
        self.node_by_pod.remove(pod);
        known
    }

    fn is_compute(&self, node: &str) -> bool {
        self.nodes_by_name
            .get(node)
            .is_some_and(|node| node.is_compute())
    }
}

/// Observer translating pods, nodes and events into gauge updates
pub struct MetricsReconciler {
    gauges: ResourceGauges,
    state: Mutex<EngineState>,
    seen_events: DedupCache,
    since: DateTime<Utc>,
    node_type_gating: bool,
    metrics: WatcherMetrics,
    logger: Option<StructuredLogger>,
}

impl MetricsReconciler {
    /// Create an engine ignoring events last seen before `since`
    ///
    /// With `node_type_gating` on, containers only get series while their
    /// node is known to be of type `compute`.
    pub fn new(gauges: ResourceGauges, since: DateTime<Utc>, node_type_gating: bool) -> Self {
        Self {
            gauges,
            state: Mutex::new(EngineState::default()),
            seen_events: DedupCache::with_since(since),
            since,
            node_type_gating,
            metrics: WatcherMetrics::new(),
            logger: None,
        }
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Number of pods with recorded series
    pub fn tracked_pods(&self) -> usize {
        self.lock().containers_by_pod.len()
    }

    pub fn is_tracked(&self, pod: &str) -> bool {
        let state = self.lock();
        state.containers_by_pod.contains_key(pod)
            || state.namespace_by_pod.contains_key(pod)
            || state.node_by_pod.contains_key(pod)
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn observe_pod(&self, state: &mut EngineState, pod: &Pod) {
        let Some(node) = pod.node.as_deref() else {
            debug!(pod = %pod.name, "Pod not scheduled yet, skipping");
            return;
        };

        // Series written under a previous node, namespace or container set
        let current: HashSet<&str> = pod.containers.iter().map(|c| c.name.as_str()).collect();
        for labels in state.recorded_labels(&pod.name) {
            if labels.node != node
                || labels.namespace != pod.namespace
                || !current.contains(labels.container.as_str())
            {
                self.gauges.remove_container(&labels);
            }
        }

        state.record(pod, node);

        let gated_in = !self.node_type_gating || state.is_compute(node);
        let running = pod.status == PodPhase::Running;

        for container in &pod.containers {
            let labels = ContainerLabels {
                node: node.to_string(),
                container: container.name.clone(),
                pod: pod.name.clone(),
                namespace: pod.namespace.clone(),
            };

            if !(running && gated_in) {
                self.gauges.remove_container(&labels);
                continue;
            }

            match container_resources(container) {
                Ok(resources) => self.gauges.set_container(&labels, resources),
                Err(e) => warn!(
                    pod = %pod.name,
                    namespace = %pod.namespace,
                    container = %container.name,
                    error = %e,
                    "Malformed resource quantity, skipping container"
                ),
            }
        }
    }

    fn observe_node(&self, state: &mut EngineState, node: &Node) -> Result<(), ReconcileError> {
        let previous = state.nodes_by_name.insert(node.name.clone(), node.clone());
        if let Some(previous) = previous {
            if previous.node_type != node.node_type {
                self.gauges.remove_node(&node.name, &previous.node_type);
            }
        }

        if !node.ready {
            self.gauges.remove_node(&node.name, &node.node_type);
            return Ok(());
        }

        let cpu = allocatable(node, "cpu")?;
        let cpu = quantity::cores(cpu).map_err(|source| ReconcileError::Quantity {
            node: node.name.clone(),
            resource: "cpu",
            source,
        })?;
        let memory = allocatable(node, "memory")?;
        let memory = quantity::bytes(memory).map_err(|source| ReconcileError::Quantity {
            node: node.name.clone(),
            resource: "memory",
            source,
        })?;

        self.gauges
            .set_node(&node.name, &node.node_type, cpu, memory as f64);
        Ok(())
    }

    fn observe_event(&self, state: &mut EngineState, event: &Event) {
        match event.reason.as_str() {
            KILLING_REASON if event.involves_pod() => {
                self.remove_pod(state, &event.name, KILLING_REASON);
            }
            SUCCESSFUL_DELETE_REASON => {
                if let Some(name) = deleted_pod_name(&event.message) {
                    self.remove_pod(state, name, SUCCESSFUL_DELETE_REASON);
                }
            }
            _ => {}
        }
    }

    fn remove_pod(&self, state: &mut EngineState, pod: &str, signal: &str) {
        let labels = state.recorded_labels(pod);
        for label in &labels {
            self.gauges.remove_container(label);
        }

        if state.forget(pod) {
            if let (Some(logger), Some(first)) = (&self.logger, labels.first()) {
                logger.log_pod_removed(pod, &first.namespace, labels.len(), signal);
            }
        }
    }
}

impl Observer for MetricsReconciler {
    fn name(&self) -> &'static str {
        "metrics_reconciler"
    }

    fn observe(&self, resource: &Resource, feed: ResourceKind) {
        // Replays older than `since` never reach the dedup cache
        if let Resource::Event(event) = resource {
            if event.last_seen < self.since
                || self.seen_events.check_and_mark(&event.to_string(), Utc::now())
            {
                return;
            }
        }

        let mut state = self.lock();
        let result = match resource {
            Resource::Pod(pod) => {
                self.observe_pod(&mut state, pod);
                Ok(())
            }
            Resource::Node(node) => self.observe_node(&mut state, node),
            Resource::Event(event) => {
                self.observe_event(&mut state, event);
                Ok(())
            }
            Resource::Project(_) => Ok(()),
        };
        self.metrics
            .set_tracked_pods(state.containers_by_pod.len() as i64);
        drop(state);

        if let Err(e) = result {
            warn!(feed = %feed, resource = %resource.name(), error = %e, "Failed to reconcile resource");
            self.metrics.inc_observer_failures(self.name());
        }
    }
}

fn container_resources(container: &Container) -> Result<ContainerResources, QuantityError> {
    let requirements = &container.resources;
    Ok(ContainerResources {
        cpu_request: quantity::cores(requirements.request("cpu").unwrap_or("0"))?,
        memory_request: quantity::bytes(requirements.request("memory").unwrap_or("0"))? as f64,
        cpu_limit: quantity::cores(requirements.limit("cpu").unwrap_or("0"))?,
        memory_limit: quantity::bytes(requirements.limit("memory").unwrap_or("0"))? as f64,
    })
}

fn allocatable<'a>(node: &'a Node, resource: &'static str) -> Result<&'a str, ReconcileError> {
    node.allocatable
        .get(resource)
        .map(String::as_str)
        .ok_or_else(|| ReconcileError::MissingAllocatable {
            node: node.name.clone(),
            resource,
        })
}

/// Pod name from a `Deleted pod: <name>` message
fn deleted_pod_name(message: &str) -> Option<&str> {
    let name = message.strip_prefix(DELETED_POD_PREFIX)?.trim();
    (!name.is_empty()).then_some(name)
}
