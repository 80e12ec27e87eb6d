//! Observers notified of every decoded watch record
//!
//! This module provides:
//! - The [`Observer`] trait every feed dispatches to
//! - A console printer for deduplicated resource lines
//! - Anomaly observers (system OOM, failed pod kill, container OOM) that print
//!   a banner and forward a message to the alert sink
//! - Alert sinks and the fire-and-forget alert dispatcher

mod alerts;
mod console;
mod sink;

pub use alerts::{FailedPodKill, Notification, PodOom, SystemOom};
pub use console::{Console, Style};
pub use sink::{AlertError, AlertSink, Alerts, SlackSink, DEFAULT_ALERT_TIMEOUT};

use crate::resources::{Resource, ResourceKind};

/// A sink for decoded resources
///
/// Feeds call `observe` synchronously from their read loop, so
/// implementations must not block: anything slow (network calls) has to be
/// handed off.
pub trait Observer: Send + Sync {
    /// Short name used in logs and metrics
    fn name(&self) -> &'static str;

    /// Handle one decoded resource delivered by the feed of kind `feed`
    fn observe(&self, resource: &Resource, feed: ResourceKind);
}
