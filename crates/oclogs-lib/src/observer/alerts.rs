//! Anomaly observers: system OOM, failed pod kills and container OOM kills
//!
//! Each observer prints a framed banner to the console and forwards a short
//! message to the alert sink.

use chrono::{DateTime, Utc};

use super::console::Style;
use super::sink::Alerts;
use super::Observer;
use crate::dedup::DedupCache;
use crate::resources::{Container, Event, Pod, Resource, ResourceKind, DATE_FORMAT};

const SYSTEM_OOM_REASON: &str = "SystemOOM";
const FAILED_KILL_REASON: &str = "FailedKillPod";
const OOM_KILLED_REASON: &str = "OOMKilled";

/// A console banner plus the message sent to the alert sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub banner: String,
    pub alert: String,
}

impl Notification {
    fn emit(self, alerts: &Alerts) {
        println!("{}", self.banner);
        alerts.send(self.alert);
    }
}

fn banner(style: &Style, title: &str, lines: &[String]) -> String {
    let (top, bottom) = style.banner(title);
    let mut out = Vec::with_capacity(lines.len() + 2);
    out.push(top);
    out.extend(lines.iter().cloned());
    out.push(bottom);
    out.join("\n")
}

/// Node-level OOM events, deduplicated per node
pub struct SystemOom {
    dedup: DedupCache,
    style: Style,
    alerts: Alerts,
}

impl SystemOom {
    pub fn new(dedup: DedupCache, style: Style, alerts: Alerts) -> Self {
        Self {
            dedup,
            style,
            alerts,
        }
    }

    pub fn notification(&self, event: &Event, now: DateTime<Utc>) -> Option<Notification> {
        if event.reason != SYSTEM_OOM_REASON || event.last_seen < self.dedup.since() {
            return None;
        }

        let node = event.node.as_deref().unwrap_or("unknown");
        if self.dedup.check_and_mark(node, now) {
            return None;
        }

        Some(Notification {
            banner: banner(
                &self.style,
                "SYSTEM OOM",
                &[
                    format!("Node: {node}"),
                    format!("Killed: {}", event.last_seen.format(DATE_FORMAT)),
                ],
            ),
            alert: [
                ":rotating_light: *System OOM* :rotating_light:".to_string(),
                format!("Node: {node}"),
            ]
            .join("\n"),
        })
    }
}

impl Observer for SystemOom {
    fn name(&self) -> &'static str {
        "system_oom"
    }

    fn observe(&self, resource: &Resource, _feed: ResourceKind) {
        if let Resource::Event(event) = resource {
            if let Some(notification) = self.notification(event, Utc::now()) {
                notification.emit(&self.alerts);
            }
        }
    }
}

/// Pods the node agent failed to kill, deduplicated per namespace and pod
pub struct FailedPodKill {
    dedup: DedupCache,
    style: Style,
    alerts: Alerts,
}

impl FailedPodKill {
    pub fn new(dedup: DedupCache, style: Style, alerts: Alerts) -> Self {
        Self {
            dedup,
            style,
            alerts,
        }
    }

    pub fn notification(&self, event: &Event, now: DateTime<Utc>) -> Option<Notification> {
        if event.reason != FAILED_KILL_REASON || event.last_seen < self.dedup.since() {
            return None;
        }

        let key = format!("{}/{}", event.namespace, event.name);
        if self.dedup.check_and_mark(&key, now) {
            return None;
        }

        let one_line: Vec<&str> = event.message.lines().collect();
        Some(Notification {
            banner: banner(
                &self.style,
                "Failed to kill pod",
                &[
                    format!("Pod: {}", event.name),
                    format!("Killed: {}", event.last_seen.format(DATE_FORMAT)),
                    event.message.clone(),
                ],
            ),
            alert: [
                ":super_saiyan: *Failed to kill pod* :super_saiyan:".to_string(),
                format!("Namespace: {}", event.namespace),
                format!("Pod: {}", event.name),
                format!("```{}```", one_line.join(" ")),
            ]
            .join("\n"),
        })
    }
}

impl Observer for FailedPodKill {
    fn name(&self) -> &'static str {
        "failed_pod_kill"
    }

    fn observe(&self, resource: &Resource, _feed: ResourceKind) {
        if let Resource::Event(event) = resource {
            if let Some(notification) = self.notification(event, Utc::now()) {
                notification.emit(&self.alerts);
            }
        }
    }
}

/// Containers terminated by the OOM killer after the cutoff
///
/// Not deduplicated: every pod update carrying a recent OOM kill fires.
pub struct PodOom {
    since: DateTime<Utc>,
    style: Style,
    alerts: Alerts,
}

impl PodOom {
    pub fn new(since: DateTime<Utc>, style: Style, alerts: Alerts) -> Self {
        Self {
            since,
            style,
            alerts,
        }
    }

    pub fn notifications(&self, pod: &Pod) -> Vec<Notification> {
        pod.containers
            .iter()
            .filter_map(|container| {
                let killed = self.oom_killed_at(container)?;
                Some(self.notification(pod, container, killed))
            })
            .collect()
    }

    fn oom_killed_at(&self, container: &Container) -> Option<DateTime<Utc>> {
        match container.termination()? {
            (Some(OOM_KILLED_REASON), Some(finished)) if finished > self.since => Some(finished),
            _ => None,
        }
    }

    fn notification(&self, pod: &Pod, container: &Container, killed: DateTime<Utc>) -> Notification {
        Notification {
            banner: banner(
                &self.style,
                "OOM KILLED",
                &[
                    format!("Pod: {}", pod.name),
                    format!("Container: {}", container.name),
                    format!("Killed: {}", killed.format(DATE_FORMAT)),
                ],
            ),
            alert: [
                ":dead-docker: *POD OOM* :dead-docker:".to_string(),
                format!("Namespace: {}", pod.namespace),
                format!("Pod: {}", pod.name),
                format!("Container: {}", container.name),
            ]
            .join("\n"),
        }
    }
}

impl Observer for PodOom {
    fn name(&self) -> &'static str {
        "pod_oom"
    }

    fn observe(&self, resource: &Resource, _feed: ResourceKind) {
        if let Resource::Pod(pod) = resource {
            for notification in self.notifications(pod) {
                notification.emit(&self.alerts);
            }
        }
    }
}
