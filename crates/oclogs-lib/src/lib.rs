//! Cluster watch library
//!
//! This crate provides the core functionality for:
//! - Parsing resource quantities
//! - Decoding pods, events, nodes and projects from watch records
//! - Reconnecting watch feeds with synchronous observer fan-out
//! - Console and alert observers with time-windowed deduplication
//! - Reconciling request/limit/allocatable gauges from watch deltas
//! - Health checks and observability

pub mod dedup;
pub mod feed;
pub mod health;
pub mod observability;
pub mod observer;
pub mod quantity;
pub mod reconcile;
pub mod resources;

pub use dedup::DedupCache;
pub use feed::{FeedConfig, FeedError, TlsSetting, WatchFeed};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use observability::{StructuredLogger, WatcherMetrics};
pub use observer::Observer;
pub use reconcile::{MetricsReconciler, ResourceGauges};
pub use resources::{Resource, ResourceKind};
