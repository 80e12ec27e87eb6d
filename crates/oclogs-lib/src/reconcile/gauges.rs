//! Gauge families written by the metrics reconciler

use prometheus::{GaugeVec, Opts, Registry};

pub const POD_METRIC_PREFIX: &str = "kube_running_pod_container_resource_";
pub const NODE_METRIC_PREFIX: &str = "klape_kube_node_status_allocatable_";

const POD_LABELS: [&str; 4] = ["node", "container", "pod", "namespace"];
const NODE_LABELS: [&str; 2] = ["node", "type"];

/// Identity of one container's series
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerLabels {
    pub node: String,
    pub container: String,
    pub pod: String,
    pub namespace: String,
}

impl ContainerLabels {
    fn values(&self) -> [&str; 4] {
        [&self.node, &self.container, &self.pod, &self.namespace]
    }
}

/// Requests and limits of one container, in cores and bytes
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ContainerResources {
    pub cpu_request: f64,
    pub memory_request: f64,
    pub cpu_limit: f64,
    pub memory_limit: f64,
}

/// The six gauge families
#[derive(Clone)]
pub struct ResourceGauges {
    cpu_request: GaugeVec,
    memory_request: GaugeVec,
    cpu_limit: GaugeVec,
    memory_limit: GaugeVec,
    node_cpu: GaugeVec,
    node_memory: GaugeVec,
}

fn gauge_vec(
    registry: &Registry,
    name: String,
    help: &str,
    labels: &[&str],
) -> Result<GaugeVec, prometheus::Error> {
    let gauge = GaugeVec::new(Opts::new(name, help), labels)?;
    registry.register(Box::new(gauge.clone()))?;
    Ok(gauge)
}

impl ResourceGauges {
    /// Create the gauge families and register them in `registry`
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let pod = |suffix: &str, help: &str| {
            gauge_vec(
                registry,
                format!("{POD_METRIC_PREFIX}{suffix}"),
                help,
                &POD_LABELS,
            )
        };
        let node = |suffix: &str, help: &str| {
            gauge_vec(
                registry,
                format!("{NODE_METRIC_PREFIX}{suffix}"),
                help,
                &NODE_LABELS,
            )
        };

        Ok(Self {
            cpu_request: pod("requests_cpu_cores", "CPU cores requested by a running container")?,
            memory_request: pod(
                "requests_memory_bytes",
                "Memory bytes requested by a running container",
            )?,
            cpu_limit: pod("limits_cpu_cores", "CPU core limit of a running container")?,
            memory_limit: pod("limits_memory_bytes", "Memory byte limit of a running container")?,
            node_cpu: node("cpu_cores", "Allocatable CPU cores of a ready node")?,
            node_memory: node("memory_bytes", "Allocatable memory bytes of a ready node")?,
        })
    }

    fn container_gauges(&self) -> [&GaugeVec; 4] {
        [
            &self.cpu_request,
            &self.memory_request,
            &self.cpu_limit,
            &self.memory_limit,
        ]
    }

    pub fn set_container(&self, labels: &ContainerLabels, resources: ContainerResources) {
        let values = labels.values();
        self.cpu_request
            .with_label_values(&values)
            .set(resources.cpu_request);
        self.memory_request
            .with_label_values(&values)
            .set(resources.memory_request);
        self.cpu_limit
            .with_label_values(&values)
            .set(resources.cpu_limit);
        self.memory_limit
            .with_label_values(&values)
            .set(resources.memory_limit);
    }

    /// Drop all four series of a container; absent series are ignored
    pub fn remove_container(&self, labels: &ContainerLabels) {
        let values = labels.values();
        for gauge in self.container_gauges() {
            let _ = gauge.remove_label_values(&values);
        }
    }

    pub fn set_node(&self, node: &str, node_type: &str, cpu: f64, memory: f64) {
        self.node_cpu.with_label_values(&[node, node_type]).set(cpu);
        self.node_memory
            .with_label_values(&[node, node_type])
            .set(memory);
    }

    pub fn remove_node(&self, node: &str, node_type: &str) {
        for gauge in [&self.node_cpu, &self.node_memory] {
            let _ = gauge.remove_label_values(&[node, node_type]);
        }
    }
}
