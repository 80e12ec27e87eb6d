//! Alert delivery
//!
//! [`AlertSink`] is the async seam for chat backends. [`Alerts`] hands each
//! message to a spawned task so observers never wait on the network.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Default upper bound on a single delivery
pub const DEFAULT_ALERT_TIMEOUT: Duration = Duration::from_secs(10);

const SLACK_POST_MESSAGE_URL: &str = "https://slack.com/api/chat.postMessage";

#[derive(Error, Debug)]
pub enum AlertError {
    #[error("alert transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("alert rejected: {0}")]
    Rejected(String),
    #[error("alert delivery timed out")]
    Timeout,
}

/// A chat backend that accepts plain text messages
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn send_message(&self, text: &str) -> Result<(), AlertError>;
}

/// Posts messages to a Slack channel with a bot token
pub struct SlackSink {
    client: Client,
    token: String,
    channel: String,
    endpoint: String,
}

#[derive(Serialize)]
struct PostMessage<'a> {
    channel: &'a str,
    text: &'a str,
}

#[derive(Deserialize)]
struct PostMessageResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

impl SlackSink {
    pub fn new(token: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            token: token.into(),
            channel: channel.into(),
            endpoint: SLACK_POST_MESSAGE_URL.to_string(),
        }
    }

    /// Override the `chat.postMessage` URL
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }
}

#[async_trait]
impl AlertSink for SlackSink {
    async fn send_message(&self, text: &str) -> Result<(), AlertError> {
        let payload = PostMessage {
            channel: &self.channel,
            text,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AlertError::Rejected(format!("{status}: {body}")));
        }

        // Slack reports most failures with a 200 and ok=false
        let body: PostMessageResponse = response.json().await?;
        if body.ok {
            Ok(())
        } else {
            Err(AlertError::Rejected(
                body.error.unwrap_or_else(|| "unknown error".to_string()),
            ))
        }
    }
}

/// Fire-and-forget alert dispatcher shared by the anomaly observers
#[derive(Clone)]
pub struct Alerts {
    sink: Option<Arc<dyn AlertSink>>,
    timeout: Duration,
}

impl Default for Alerts {
    fn default() -> Self {
        Self::disabled()
    }
}

impl Alerts {
    /// Drop every message
    pub fn disabled() -> Self {
        Self {
            sink: None,
            timeout: DEFAULT_ALERT_TIMEOUT,
        }
    }

    pub fn new(sink: Arc<dyn AlertSink>) -> Self {
        Self {
            sink: Some(sink),
            timeout: DEFAULT_ALERT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    /// Queue `text` for delivery without waiting for it
    ///
    /// Failures are logged and dropped. Outside a tokio runtime the message
    /// is dropped with a warning.
    pub fn send(&self, text: String) {
        let Some(sink) = self.sink.clone() else {
            debug!("Alert sink disabled, dropping alert");
            return;
        };

        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!("No async runtime available, dropping alert");
                return;
            }
        };

        let timeout = self.timeout;
        handle.spawn(async move {
            let result = match tokio::time::timeout(timeout, sink.send_message(&text)).await {
                Ok(result) => result,
                Err(_) => Err(AlertError::Timeout),
            };
            if let Err(e) = result {
                warn!(error = %e, "Failed to deliver alert");
            }
        });
    }
}
