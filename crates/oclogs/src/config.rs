//! Watcher configuration

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use oclogs_lib::feed::{FeedConfig, DEFAULT_MAX_LINE_BYTES};
use oclogs_lib::observer::{Alerts, SlackSink};
use serde::Deserialize;

/// Tunables loaded from an optional file and `OCLOGS_*` environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct WatcherConfig {
    /// Port of the `/metrics`, `/healthz` and `/readyz` server
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Pause before reconnecting a lost watch stream
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Longest silence tolerated on an open watch stream
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Largest watch record accepted before the stream is reopened
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,

    /// Delay between starting the node feed and the other feeds
    #[serde(default = "default_node_settle_secs")]
    pub node_settle_secs: u64,

    /// How far back from startup notifications are still emitted
    #[serde(default = "default_lookback_secs")]
    pub lookback_secs: i64,

    /// Only write container gauges for pods on `compute` nodes
    #[serde(default = "default_true")]
    pub node_type_gating: bool,

    #[serde(default = "default_alert_timeout_secs")]
    pub alert_timeout_secs: u64,

    #[serde(default)]
    pub log_json: bool,

    /// Also watch projects (not served by plain clusters)
    #[serde(default)]
    pub watch_projects: bool,

    #[serde(default = "default_slack_token")]
    pub slack_token: Option<String>,

    #[serde(default = "default_slack_channel")]
    pub slack_channel: Option<String>,
}

fn default_metrics_port() -> u16 {
    8000
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_read_timeout_secs() -> u64 {
    300
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_max_line_bytes() -> usize {
    DEFAULT_MAX_LINE_BYTES
}

fn default_node_settle_secs() -> u64 {
    2
}

fn default_lookback_secs() -> i64 {
    60
}

fn default_true() -> bool {
    true
}

fn default_alert_timeout_secs() -> u64 {
    10
}

fn default_slack_token() -> Option<String> {
    std::env::var("SLACK_TOKEN").ok()
}

fn default_slack_channel() -> Option<String> {
    std::env::var("SLACK_CHANNEL").ok()
}

impl WatcherConfig {
    /// Load configuration from an optional file, then the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }

        let config = builder
            .add_source(config::Environment::with_prefix("OCLOGS").try_parsing(true))
            .build()
            .context("Failed to load configuration")?;

        config
            .try_deserialize()
            .context("Invalid configuration")
    }

    pub fn feed_config(&self) -> FeedConfig {
        FeedConfig {
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            read_timeout: Duration::from_secs(self.read_timeout_secs),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            max_line_bytes: self.max_line_bytes,
        }
    }

    pub fn node_settle(&self) -> Duration {
        Duration::from_secs(self.node_settle_secs)
    }

    /// Cutoff before which events are treated as replays
    pub fn since(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - chrono::Duration::seconds(self.lookback_secs)
    }

    /// Slack dispatcher when both token and channel are set, else a no-op
    pub fn alerts(&self) -> Alerts {
        match (&self.slack_token, &self.slack_channel) {
            (Some(token), Some(channel)) if !token.is_empty() && !channel.is_empty() => {
                Alerts::new(Arc::new(SlackSink::new(token, channel)))
                    .with_timeout(Duration::from_secs(self.alert_timeout_secs))
            }
            _ => Alerts::disabled(),
        }
    }
}
