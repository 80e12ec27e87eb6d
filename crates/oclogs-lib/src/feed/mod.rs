//! Reconnecting watch streams
//!
//! One [`WatchFeed`] runs per resource kind. It opens a streaming GET on the
//! kind's watch endpoint, decodes each newline-delimited record into a
//! [`Resource`] and hands it to every registered observer in order.
//!
//! Transport failures and normal stream ends are retried forever after a
//! fixed delay. A non-200 response stops the feed for good, so a revoked
//! token does not hammer the API.

mod client;

pub use client::{auth_headers, build_client, TlsSetting};

use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, warn};
use url::Url;

use crate::health::HealthRegistry;
use crate::observability::{StructuredLogger, WatcherMetrics};
use crate::observer::Observer;
use crate::resources::{Resource, ResourceKind};

/// Watch type the API uses for in-band failures such as `410 Gone`
const ERROR_RECORD: &str = "ERROR";

/// Default cap on one buffered watch line
pub const DEFAULT_MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("invalid watch url {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("cannot read CA bundle {path}: {source}")]
    CaBundle {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("bearer token is not a valid header value")]
    InvalidToken(#[from] reqwest::header::InvalidHeaderValue),

    #[error("watch transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("no data received for {0:?}")]
    ReadTimeout(Duration),

    #[error("watch line exceeds {limit} bytes without a newline")]
    LineTooLong { limit: usize },

    #[error("watch rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Timing knobs shared by every feed
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Pause between a lost stream and the next connection
    pub retry_delay: Duration,
    /// Longest wait for the next chunk before the stream counts as dead
    pub read_timeout: Duration,
    pub connect_timeout: Duration,
    /// Longest record accepted before the stream is dropped and reopened
    pub max_line_bytes: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_secs(1),
            read_timeout: Duration::from_secs(300),
            connect_timeout: Duration::from_secs(10),
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        }
    }
}

/// `{api}/watch/[namespaces/{ns}/]{plural}`
///
/// The namespace scope only applies to namespaced kinds.
pub fn watch_url(api: &str, namespace: Option<&str>, kind: ResourceKind) -> Result<Url, FeedError> {
    let base = api.trim_end_matches('/');
    let url = match namespace.filter(|_| kind.is_namespaced()) {
        Some(ns) => format!("{base}/watch/namespaces/{ns}/{}", kind.plural()),
        None => format!("{base}/watch/{}", kind.plural()),
    };
    Url::parse(&url).map_err(|source| FeedError::InvalidUrl { url, source })
}

#[derive(Deserialize)]
struct WatchRecord {
    #[serde(rename = "type")]
    event_type: Option<String>,
    object: Value,
}

/// Reconnecting watch stream for one resource kind
pub struct WatchFeed {
    kind: ResourceKind,
    client: Client,
    url: Url,
    observers: Vec<Arc<dyn Observer>>,
    config: FeedConfig,
    health: Option<HealthRegistry>,
    metrics: WatcherMetrics,
    logger: StructuredLogger,
}

impl WatchFeed {
    pub fn new(
        kind: ResourceKind,
        client: Client,
        api: &str,
        namespace: Option<&str>,
        observers: Vec<Arc<dyn Observer>>,
        config: FeedConfig,
    ) -> Result<Self, FeedError> {
        Ok(Self {
            kind,
            client,
            url: watch_url(api, namespace, kind)?,
            observers,
            config,
            health: None,
            metrics: WatcherMetrics::new(),
            logger: StructuredLogger::new(api),
        })
    }

    /// Report stream state to `health`
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Stream until the API rejects the watch request
    ///
    /// Only returns on rejection; every other failure is retried.
    pub async fn run(self) -> FeedError {
        let feed = self.kind.plural();
        if let Some(health) = &self.health {
            health.register_feed(self.kind).await;
        }

        loop {
            let reason = match self.stream_once().await {
                Ok(()) => "stream ended".to_string(),
                Err(FeedError::Rejected { status, body }) => {
                    self.metrics.inc_rejections(feed);
                    self.logger.log_feed_rejected(feed, status, &body);
                    if let Some(health) = &self.health {
                        health
                            .set_rejected(self.kind, format!("watch rejected with status {status}"))
                            .await;
                    }
                    return FeedError::Rejected { status, body };
                }
                Err(e) => e.to_string(),
            };

            self.metrics.inc_stream_ends(feed);
            self.logger
                .log_feed_retry(feed, &reason, self.config.retry_delay.as_millis());
            if let Some(health) = &self.health {
                health.set_reconnecting(self.kind, reason).await;
            }
            tokio::time::sleep(self.config.retry_delay).await;
        }
    }

    /// One connection: open, read until the body ends, dispatch every line
    async fn stream_once(&self) -> Result<(), FeedError> {
        let feed = self.kind.plural();
        let mut response = self.client.get(self.url.clone()).send().await?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(FeedError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        self.metrics.inc_connections(feed);
        self.logger.log_feed_connected(feed, self.url.as_str());
        if let Some(health) = &self.health {
            health.set_streaming(self.kind).await;
        }

        let mut lines = LineBuffer::new(self.config.max_line_bytes);
        loop {
            let chunk = tokio::time::timeout(self.config.read_timeout, response.chunk())
                .await
                .map_err(|_| FeedError::ReadTimeout(self.config.read_timeout))??;
            let Some(chunk) = chunk else {
                break;
            };

            lines.push(&chunk, |line| self.handle_line(line))?;
        }

        // A final record without a trailing newline
        let rest = lines.into_rest();
        if !rest.is_empty() {
            self.handle_line(&rest);
        }

        Ok(())
    }

    fn handle_line(&self, line: &[u8]) {
        if line.iter().all(u8::is_ascii_whitespace) {
            return;
        }
        let feed = self.kind.plural();

        let record: WatchRecord = match serde_json::from_slice(line) {
            Ok(record) => record,
            Err(e) => {
                self.metrics.inc_decode_errors(feed);
                warn!(feed = %feed, error = %e, "Skipping unparsable watch line");
                return;
            }
        };

        if record.event_type.as_deref() == Some(ERROR_RECORD) {
            warn!(feed = %feed, object = %record.object, "Watch returned an error record");
            return;
        }

        match Resource::decode(self.kind, record.object) {
            Ok(resource) => {
                self.metrics.inc_records_decoded(feed);
                self.dispatch(&resource);
            }
            Err(e) => {
                self.metrics.inc_decode_errors(feed);
                warn!(feed = %feed, error = %e, "Skipping undecodable watch record");
            }
        }
    }

    /// Hand `resource` to every observer in registration order
    fn dispatch(&self, resource: &Resource) {
        for observer in &self.observers {
            let outcome =
                panic::catch_unwind(AssertUnwindSafe(|| observer.observe(resource, self.kind)));
            if outcome.is_err() {
                self.metrics.inc_observer_failures(observer.name());
                error!(
                    feed = %self.kind,
                    observer = observer.name(),
                    resource = %resource.name(),
                    "Observer panicked, continuing"
                );
            }
        }
        debug!(feed = %self.kind, resource = %resource.name(), "Dispatched record");
    }
}

/// Splits a byte stream into newline-terminated lines
///
/// Bytes already searched for a newline are not searched again when the
/// next chunk arrives.
struct LineBuffer {
    pending: Vec<u8>,
    scanned: usize,
    max_len: usize,
}

impl LineBuffer {
    fn new(max_len: usize) -> Self {
        Self {
            pending: Vec::new(),
            scanned: 0,
            max_len,
        }
    }

    /// Append `chunk` and pass every completed line to `on_line`
    fn push(&mut self, chunk: &[u8], mut on_line: impl FnMut(&[u8])) -> Result<(), FeedError> {
        self.pending.extend_from_slice(chunk);

        let mut start = 0;
        while let Some(offset) = self.pending[self.scanned..]
            .iter()
            .position(|byte| *byte == b'\n')
        {
            let end = self.scanned + offset;
            on_line(&self.pending[start..=end]);
            start = end + 1;
            self.scanned = start;
        }

        self.pending.drain(..start);
        self.scanned = self.pending.len();
        if self.pending.len() > self.max_len {
            return Err(FeedError::LineTooLong {
                limit: self.max_len,
            });
        }
        Ok(())
    }

    /// Bytes after the last newline
    fn into_rest(self) -> Vec<u8> {
        self.pending
    }
}
