use super::*;
use chrono::Duration;
use prometheus::Registry;
use serde_json::{json, Value};
use std::sync::Arc;

const REQUESTS_CPU: &str = "kube_running_pod_container_resource_requests_cpu_cores";
const REQUESTS_MEMORY: &str = "kube_running_pod_container_resource_requests_memory_bytes";
const LIMITS_CPU: &str = "kube_running_pod_container_resource_limits_cpu_cores";
const LIMITS_MEMORY: &str = "kube_running_pod_container_resource_limits_memory_bytes";
const NODE_CPU: &str = "klape_kube_node_status_allocatable_cpu_cores";
const NODE_MEMORY: &str = "klape_kube_node_status_allocatable_memory_bytes";

fn since() -> DateTime<Utc> {
    Utc::now() - Duration::minutes(1)
}

fn reconciler(gating: bool) -> (MetricsReconciler, Registry) {
    let registry = Registry::new();
    let gauges = ResourceGauges::register(&registry).unwrap();
    (MetricsReconciler::new(gauges, since(), gating), registry)
}

/// Value of the series of `family` whose labels contain every pair in `labels`
fn gauge(registry: &Registry, family: &str, labels: &[(&str, &str)]) -> Option<f64> {
    registry
        .gather()
        .into_iter()
        .filter(|f| f.get_name() == family)
        .flat_map(|f| f.get_metric().to_vec())
        .find(|metric| {
            labels.iter().all(|(name, value)| {
                metric
                    .get_label()
                    .iter()
                    .any(|pair| pair.get_name() == *name && pair.get_value() == *value)
            })
        })
        .map(|metric| metric.get_gauge().get_value())
}

fn series_count(registry: &Registry, family: &str) -> usize {
    registry
        .gather()
        .into_iter()
        .filter(|f| f.get_name() == family)
        .map(|f| f.get_metric().len())
        .sum()
}

fn container_labels<'a>(pod: &'a str, container: &'a str) -> Vec<(&'a str, &'a str)> {
    vec![("pod", pod), ("container", container)]
}

fn node(name: &str, node_type: &str, ready: bool) -> Resource {
    Resource::decode(
        ResourceKind::Node,
        json!({
            "metadata": {"name": name, "labels": {"type": node_type}},
            "status": {
                "allocatable": {"cpu": "3500m", "memory": "16Gi"},
                "conditions": [{"type": "Ready", "status": if ready { "True" } else { "False" }}]
            }
        }),
    )
    .unwrap()
}

fn pod_doc(name: &str, node: &str, phase: &str, containers: Value) -> Value {
    json!({
        "metadata": {
            "name": name,
            "namespace": "ns",
            "creationTimestamp": "2024-03-01T09:00:00Z"
        },
        "spec": {"nodeName": node, "containers": containers},
        "status": {"phase": phase}
    })
}

fn pod(name: &str, node: &str, phase: &str) -> Resource {
    Resource::decode(
        ResourceKind::Pod,
        pod_doc(
            name,
            node,
            phase,
            json!([{
                "name": "c1",
                "resources": {
                    "requests": {"cpu": "500m", "memory": "256Mi"},
                    "limits": {"cpu": "1", "memory": "512Mi"}
                }
            }]),
        ),
    )
    .unwrap()
}

fn event(reason: &str, kind: &str, name: &str, message: &str, at: DateTime<Utc>) -> Resource {
    Resource::decode(
        ResourceKind::Event,
        json!({
            "involvedObject": {"kind": kind, "name": name, "namespace": "ns"},
            "reason": reason,
            "message": message,
            "firstTimestamp": at.to_rfc3339(),
            "lastTimestamp": at.to_rfc3339()
        }),
    )
    .unwrap()
}

fn observe(engine: &MetricsReconciler, resource: &Resource) {
    engine.observe(resource, resource.kind());
}

#[test]
fn test_running_pod_on_compute_node_sets_all_gauges() {
    let (engine, registry) = reconciler(true);
    observe(&engine, &node("n1", "compute", true));
    observe(&engine, &pod("p1", "n1", "Running"));

    let labels = [
        ("node", "n1"),
        ("container", "c1"),
        ("pod", "p1"),
        ("namespace", "ns"),
    ];
    assert_eq!(gauge(&registry, REQUESTS_CPU, &labels), Some(0.5));
    assert_eq!(gauge(&registry, REQUESTS_MEMORY, &labels), Some(268_435_456.0));
    assert_eq!(gauge(&registry, LIMITS_CPU, &labels), Some(1.0));
    assert_eq!(gauge(&registry, LIMITS_MEMORY, &labels), Some(536_870_912.0));
    assert_eq!(engine.tracked_pods(), 1);
}

#[test]
fn test_pod_leaving_running_removes_series() {
    let (engine, registry) = reconciler(true);
    observe(&engine, &node("n1", "compute", true));
    observe(&engine, &pod("p1", "n1", "Running"));
    observe(&engine, &pod("p1", "n1", "Succeeded"));

    assert_eq!(gauge(&registry, REQUESTS_CPU, &container_labels("p1", "c1")), None);
    assert_eq!(gauge(&registry, REQUESTS_MEMORY, &container_labels("p1", "c1")), None);
    // Still tracked until a deletion signal arrives
    assert!(engine.is_tracked("p1"));
}

#[test]
fn test_missing_requests_and_limits_are_zero() {
    let (engine, registry) = reconciler(true);
    observe(&engine, &node("n1", "compute", true));
    let bare = Resource::decode(
        ResourceKind::Pod,
        pod_doc("p1", "n1", "Running", json!([{"name": "c1", "resources": {"requests": {"cpu": "250m"}}}])),
    )
    .unwrap();
    observe(&engine, &bare);

    let labels = container_labels("p1", "c1");
    assert_eq!(gauge(&registry, REQUESTS_CPU, &labels), Some(0.25));
    assert_eq!(gauge(&registry, REQUESTS_MEMORY, &labels), Some(0.0));
    assert_eq!(gauge(&registry, LIMITS_CPU, &labels), Some(0.0));
    assert_eq!(gauge(&registry, LIMITS_MEMORY, &labels), Some(0.0));
}

#[test]
fn test_unscheduled_pod_is_skipped() {
    let (engine, registry) = reconciler(true);
    observe(&engine, &node("n1", "compute", true));
    let pending = Resource::decode(
        ResourceKind::Pod,
        json!({
            "metadata": {"name": "p1", "namespace": "ns", "creationTimestamp": "2024-03-01T09:00:00Z"},
            "spec": {"containers": [{"name": "c1"}]},
            "status": {"phase": "Pending"}
        }),
    )
    .unwrap();
    observe(&engine, &pending);

    assert!(!engine.is_tracked("p1"));
    assert_eq!(series_count(&registry, REQUESTS_CPU), 0);
}

#[test]
fn test_killing_event_removes_pod() {
    let (engine, registry) = reconciler(true);
    observe(&engine, &node("n1", "compute", true));
    observe(&engine, &pod("p1", "n1", "Running"));
    assert!(gauge(&registry, REQUESTS_CPU, &container_labels("p1", "c1")).is_some());

    let killing = event("Killing", "Pod", "p1", "Stopping container c1", Utc::now());
    observe(&engine, &killing);

    assert_eq!(series_count(&registry, REQUESTS_CPU), 0);
    assert_eq!(series_count(&registry, LIMITS_MEMORY), 0);
    assert!(!engine.is_tracked("p1"));

    // Replayed and later Killing events are no-ops
    observe(&engine, &killing);
    observe(
        &engine,
        &event("Killing", "Pod", "p1", "Stopping container c1", Utc::now()),
    );
    assert!(!engine.is_tracked("p1"));
    assert_eq!(engine.tracked_pods(), 0);
}

#[test]
fn test_killing_non_pod_is_ignored() {
    let (engine, registry) = reconciler(true);
    observe(&engine, &node("n1", "compute", true));
    observe(&engine, &pod("p1", "n1", "Running"));

    observe(&engine, &event("Killing", "Node", "p1", "", Utc::now()));

    assert!(engine.is_tracked("p1"));
    assert_eq!(series_count(&registry, REQUESTS_CPU), 1);
}

#[test]
fn test_successful_delete_removes_named_pod() {
    let (engine, registry) = reconciler(true);
    observe(&engine, &node("n1", "compute", true));
    observe(&engine, &pod("web-7d9f", "n1", "Running"));
    observe(&engine, &pod("web-a1b2", "n1", "Running"));

    observe(
        &engine,
        &event(
            "SuccessfulDelete",
            "ReplicaSet",
            "web",
            "Deleted pod: web-7d9f",
            Utc::now(),
        ),
    );

    assert!(!engine.is_tracked("web-7d9f"));
    assert!(engine.is_tracked("web-a1b2"));
    assert_eq!(series_count(&registry, REQUESTS_CPU), 1);
    assert!(gauge(&registry, REQUESTS_CPU, &container_labels("web-a1b2", "c1")).is_some());
}

#[test]
fn test_successful_delete_other_message_is_ignored() {
    let (engine, _registry) = reconciler(true);
    observe(&engine, &node("n1", "compute", true));
    observe(&engine, &pod("p1", "n1", "Running"));

    observe(
        &engine,
        &event("SuccessfulDelete", "Job", "cron", "Deleted job cron-1", Utc::now()),
    );

    assert!(engine.is_tracked("p1"));
}

#[test]
fn test_stale_events_are_ignored() {
    let (engine, registry) = reconciler(true);
    observe(&engine, &node("n1", "compute", true));
    observe(&engine, &pod("p1", "n1", "Running"));

    let stale = event("Killing", "Pod", "p1", "", Utc::now() - Duration::hours(1));
    observe(&engine, &stale);

    assert!(engine.is_tracked("p1"));
    assert_eq!(series_count(&registry, REQUESTS_CPU), 1);
    assert!(engine.seen_events.is_empty());
}

#[test]
fn test_infra_node_gates_pod_until_compute() {
    let (engine, registry) = reconciler(true);
    observe(&engine, &node("n1", "infra", true));
    observe(&engine, &pod("p1", "n1", "Running"));
    assert_eq!(series_count(&registry, REQUESTS_CPU), 0);

    // Node relabelled, then the pod is re-observed
    observe(&engine, &node("n1", "compute", true));
    assert_eq!(series_count(&registry, REQUESTS_CPU), 0);
    observe(&engine, &pod("p1", "n1", "Running"));
    assert_eq!(
        gauge(&registry, REQUESTS_CPU, &container_labels("p1", "c1")),
        Some(0.5)
    );
}

#[test]
fn test_pod_before_node_is_gated() {
    let (engine, registry) = reconciler(true);
    observe(&engine, &pod("p1", "n1", "Running"));
    assert_eq!(series_count(&registry, REQUESTS_CPU), 0);
    assert!(engine.is_tracked("p1"));
}

#[test]
fn test_gating_disabled_ignores_node_type() {
    let (engine, registry) = reconciler(false);
    observe(&engine, &pod("p1", "n1", "Running"));
    assert_eq!(
        gauge(&registry, REQUESTS_CPU, &container_labels("p1", "c1")),
        Some(0.5)
    );
}

#[test]
fn test_pod_moving_node_drops_old_series() {
    let (engine, registry) = reconciler(true);
    observe(&engine, &node("n1", "compute", true));
    observe(&engine, &node("n2", "compute", true));
    observe(&engine, &pod("p1", "n1", "Running"));
    observe(&engine, &pod("p1", "n2", "Running"));

    assert_eq!(series_count(&registry, REQUESTS_CPU), 1);
    assert!(gauge(&registry, REQUESTS_CPU, &[("pod", "p1"), ("node", "n2")]).is_some());
    assert!(gauge(&registry, REQUESTS_CPU, &[("pod", "p1"), ("node", "n1")]).is_none());
}

#[test]
fn test_removed_container_series_dropped() {
    let (engine, registry) = reconciler(true);
    observe(&engine, &node("n1", "compute", true));
    let two = Resource::decode(
        ResourceKind::Pod,
        pod_doc("p1", "n1", "Running", json!([{"name": "c1"}, {"name": "sidecar"}])),
    )
    .unwrap();
    observe(&engine, &two);
    assert_eq!(series_count(&registry, REQUESTS_CPU), 2);

    let one = Resource::decode(
        ResourceKind::Pod,
        pod_doc("p1", "n1", "Running", json!([{"name": "c1"}])),
    )
    .unwrap();
    observe(&engine, &one);
    assert_eq!(series_count(&registry, REQUESTS_CPU), 1);
    assert!(gauge(&registry, REQUESTS_CPU, &container_labels("p1", "sidecar")).is_none());
}

#[test]
fn test_malformed_quantity_skips_only_that_container() {
    let (engine, registry) = reconciler(true);
    observe(&engine, &node("n1", "compute", true));
    let mixed = Resource::decode(
        ResourceKind::Pod,
        pod_doc(
            "p1",
            "n1",
            "Running",
            json!([
                {"name": "bad", "resources": {"requests": {"cpu": "lots"}}},
                {"name": "good", "resources": {"requests": {"cpu": "100m"}}}
            ]),
        ),
    )
    .unwrap();
    observe(&engine, &mixed);

    assert!(gauge(&registry, REQUESTS_CPU, &container_labels("p1", "bad")).is_none());
    assert_eq!(
        gauge(&registry, REQUESTS_CPU, &container_labels("p1", "good")),
        Some(0.1)
    );
}

#[test]
fn test_ready_node_sets_allocatable() {
    let (engine, registry) = reconciler(true);
    observe(&engine, &node("n1", "compute", true));

    let labels = [("node", "n1"), ("type", "compute")];
    assert_eq!(gauge(&registry, NODE_CPU, &labels), Some(3.5));
    assert_eq!(gauge(&registry, NODE_MEMORY, &labels), Some(17_179_869_184.0));
}

#[test]
fn test_not_ready_node_removes_allocatable() {
    let (engine, registry) = reconciler(true);
    observe(&engine, &node("n1", "compute", true));
    observe(&engine, &node("n1", "compute", false));

    assert_eq!(series_count(&registry, NODE_CPU), 0);
    assert_eq!(series_count(&registry, NODE_MEMORY), 0);
}

#[test]
fn test_node_type_change_moves_allocatable() {
    let (engine, registry) = reconciler(true);
    observe(&engine, &node("n1", "infra", true));
    observe(&engine, &node("n1", "compute", true));

    assert_eq!(series_count(&registry, NODE_CPU), 1);
    assert!(gauge(&registry, NODE_CPU, &[("type", "compute")]).is_some());
    assert!(gauge(&registry, NODE_CPU, &[("type", "infra")]).is_none());
}

#[test]
fn test_node_without_allocatable_is_reported_not_fatal() {
    let (engine, registry) = reconciler(true);
    let bare = Resource::decode(
        ResourceKind::Node,
        json!({
            "metadata": {"name": "n1", "labels": {"type": "compute"}},
            "status": {"conditions": [{"type": "Ready", "status": "True"}]}
        }),
    )
    .unwrap();
    observe(&engine, &bare);
    assert_eq!(series_count(&registry, NODE_CPU), 0);

    // The node is still cached for gating
    observe(&engine, &pod("p1", "n1", "Running"));
    assert_eq!(series_count(&registry, REQUESTS_CPU), 1);
}

#[test]
fn test_deleted_pod_name() {
    assert_eq!(deleted_pod_name("Deleted pod: web-1"), Some("web-1"));
    assert_eq!(deleted_pod_name("Deleted pod:web-1 "), Some("web-1"));
    assert_eq!(deleted_pod_name("Deleted pod: "), None);
    assert_eq!(deleted_pod_name("Created pod: web-1"), None);
}

#[test]
fn test_concurrent_feeds_share_engine() {
    let (engine, registry) = reconciler(true);
    let engine = Arc::new(engine);
    observe(&engine, &node("n1", "compute", true));

    let handles: Vec<_> = (0..3)
        .map(|worker| {
            let engine = Arc::clone(&engine);
            std::thread::spawn(move || {
                for i in 0..50 {
                    let name = format!("p{worker}-{i}");
                    observe(&engine, &pod(&name, "n1", "Running"));
                    if i % 2 == 0 {
                        observe(&engine, &event("Killing", "Pod", &name, "", Utc::now()));
                    }
                    observe(&engine, &node("n1", "compute", true));
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(engine.tracked_pods(), 75);
    assert_eq!(series_count(&registry, REQUESTS_CPU), 75);
    assert_eq!(series_count(&registry, NODE_CPU), 1);
}
