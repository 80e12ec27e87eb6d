//! Feed health tracking for liveness and readiness probes
//!
//! Every running watch feed is a component: healthy while its stream is open,
//! degraded while it waits to reconnect, unhealthy once the API has rejected
//! it for good.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::resources::ResourceKind;

/// Health status of a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    /// Stream open and dispatching
    Healthy,
    /// Between connections, retrying
    Degraded,
    /// Stopped permanently
    Unhealthy,
}

impl ComponentStatus {
    /// Returns true if the component is at least partially operational
    pub fn is_operational(&self) -> bool {
        matches!(self, ComponentStatus::Healthy | ComponentStatus::Degraded)
    }
}

/// Information about a component's health
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check_timestamp: i64,
}

impl ComponentHealth {
    pub fn healthy() -> Self {
        Self::with_status(ComponentStatus::Healthy, None)
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::with_status(ComponentStatus::Degraded, Some(message.into()))
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::with_status(ComponentStatus::Unhealthy, Some(message.into()))
    }

    fn with_status(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

/// Overall health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: HashMap<String, ComponentHealth>,
}

impl HealthResponse {
    /// Worst status across components; an empty set is healthy
    pub fn compute_status(components: &HashMap<String, ComponentHealth>) -> ComponentStatus {
        let mut has_degraded = false;

        for health in components.values() {
            match health.status {
                ComponentStatus::Unhealthy => return ComponentStatus::Unhealthy,
                ComponentStatus::Degraded => has_degraded = true,
                ComponentStatus::Healthy => {}
            }
        }

        if has_degraded {
            ComponentStatus::Degraded
        } else {
            ComponentStatus::Healthy
        }
    }
}

/// Readiness response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Health registry keyed by feed
#[derive(Debug, Clone)]
pub struct HealthRegistry {
    components: Arc<RwLock<HashMap<String, ComponentHealth>>>,
    ready: Arc<RwLock<bool>>,
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self {
            components: Arc::new(RwLock::new(HashMap::new())),
            ready: Arc::new(RwLock::new(false)),
        }
    }

    /// Register a feed; it starts degraded until its first stream opens
    pub async fn register_feed(&self, kind: ResourceKind) {
        self.update(kind, ComponentHealth::degraded("connecting"))
            .await;
    }

    async fn update(&self, kind: ResourceKind, health: ComponentHealth) {
        let mut components = self.components.write().await;
        components.insert(kind.plural().to_string(), health);
    }

    /// Feed has an open stream
    pub async fn set_streaming(&self, kind: ResourceKind) {
        self.update(kind, ComponentHealth::healthy()).await;
    }

    /// Feed lost its stream and is waiting to reconnect
    pub async fn set_reconnecting(&self, kind: ResourceKind, message: impl Into<String>) {
        self.update(kind, ComponentHealth::degraded(message)).await;
    }

    /// Feed was rejected by the API and has stopped
    pub async fn set_rejected(&self, kind: ResourceKind, message: impl Into<String>) {
        self.update(kind, ComponentHealth::unhealthy(message)).await;
    }

    /// Set readiness status
    pub async fn set_ready(&self, ready: bool) {
        let mut r = self.ready.write().await;
        *r = ready;
    }

    /// Get health response
    pub async fn health(&self) -> HealthResponse {
        let components = self.components.read().await.clone();
        let status = HealthResponse::compute_status(&components);
        HealthResponse { status, components }
    }

    /// Get readiness response
    pub async fn readiness(&self) -> ReadinessResponse {
        let ready = *self.ready.read().await;
        let health = self.health().await;

        if !ready {
            ReadinessResponse {
                ready: false,
                reason: Some("Feeds not yet started".to_string()),
            }
        } else if health.status == ComponentStatus::Unhealthy {
            ReadinessResponse {
                ready: false,
                reason: Some("A watch feed was rejected".to_string()),
            }
        } else {
            ReadinessResponse {
                ready: true,
                reason: None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_health_registry_initial_state() {
        let registry = HealthRegistry::new();
        let health = registry.health().await;

        assert_eq!(health.status, ComponentStatus::Healthy);
        assert!(health.components.is_empty());
    }

    #[tokio::test]
    async fn test_feed_lifecycle() {
        let registry = HealthRegistry::new();
        registry.register_feed(ResourceKind::Pod).await;
        registry.register_feed(ResourceKind::Node).await;

        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Degraded);
        assert!(health.components.contains_key("pods"));

        registry.set_streaming(ResourceKind::Pod).await;
        registry.set_streaming(ResourceKind::Node).await;
        assert_eq!(registry.health().await.status, ComponentStatus::Healthy);

        registry
            .set_reconnecting(ResourceKind::Pod, "stream ended")
            .await;
        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Degraded);
        assert!(health.status.is_operational());
        assert_eq!(
            health.components["pods"].message.as_deref(),
            Some("stream ended")
        );
    }

    #[tokio::test]
    async fn test_rejected_feed_is_unhealthy() {
        let registry = HealthRegistry::new();
        registry.register_feed(ResourceKind::Event).await;
        registry
            .set_rejected(ResourceKind::Event, "403 Forbidden")
            .await;

        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Unhealthy);
        assert!(!health.status.is_operational());
    }

    #[tokio::test]
    async fn test_readiness_not_ready_initially() {
        let registry = HealthRegistry::new();
        let readiness = registry.readiness().await;

        assert!(!readiness.ready);
        assert!(readiness.reason.is_some());
    }

    #[tokio::test]
    async fn test_readiness_ready_when_set() {
        let registry = HealthRegistry::new();
        registry.register_feed(ResourceKind::Pod).await;
        registry.set_ready(true).await;

        // Reconnecting feeds do not block readiness
        assert!(registry.readiness().await.ready);
    }

    #[tokio::test]
    async fn test_readiness_not_ready_when_rejected() {
        let registry = HealthRegistry::new();
        registry.register_feed(ResourceKind::Pod).await;
        registry.set_ready(true).await;
        registry.set_rejected(ResourceKind::Pod, "401").await;

        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
    }
}
