//! oclogs - cluster watcher
//!
//! Streams pods, events and nodes from the cluster API, prints deduplicated
//! lines to the console, raises alerts for OOM kills and failed pod kills,
//! and exposes request/limit/allocatable gauges for Prometheus.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use oclogs_lib::{
    dedup::DedupCache,
    feed::{auth_headers, build_client, FeedConfig, TlsSetting, WatchFeed},
    health::HealthRegistry,
    observability::StructuredLogger,
    observer::{Console, FailedPodKill, Observer, PodOom, Style, SystemOom},
    reconcile::{MetricsReconciler, ResourceGauges},
    resources::ResourceKind,
};
use reqwest::Client;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Watch cluster pods, events and nodes
#[derive(Parser, Debug)]
#[command(name = "oclogs")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// API server host; watches go to https://{api}/api/v1
    #[arg(long, env = "OCLOGS_API")]
    api: String,

    /// File holding the bearer token (default: ~/token)
    #[arg(long, env = "OCLOGS_TOKEN")]
    token: Option<PathBuf>,

    /// Only watch pods and events in this namespace
    #[arg(short, long, env = "OCLOGS_NAMESPACE")]
    namespace: Option<String>,

    /// Colored console output (default)
    #[arg(long, overrides_with = "no_color")]
    color: bool,

    /// Plain console output
    #[arg(long, overrides_with = "color")]
    no_color: bool,

    /// CA bundle for the API server certificate, or "false" to skip verification
    #[arg(long, env = "OCLOGS_CA_STORE")]
    ca_store: Option<String>,

    /// Also watch projects
    #[arg(long)]
    projects: bool,

    /// Optional configuration file
    #[arg(long, env = "OCLOGS_CONFIG")]
    config: Option<PathBuf>,
}

impl Cli {
    fn api_base(&self) -> String {
        format!("https://{}/api/v1", self.api)
    }

    fn color(&self) -> bool {
        !self.no_color
    }

    fn token_path(&self) -> Result<PathBuf> {
        match &self.token {
            Some(path) => Ok(path.clone()),
            None => {
                let home = dirs_next::home_dir().context("Could not determine home directory")?;
                Ok(home.join("token"))
            }
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    // stdout is reserved for console notifications
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    }
}

fn read_token(path: &Path) -> Result<String> {
    let token = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read token file {}", path.display()))?;
    Ok(token.trim().to_string())
}

/// Runs one feed in the background; it only ends if the API rejects it
fn spawn_feed(
    kind: ResourceKind,
    client: &Client,
    api: &str,
    namespace: Option<&str>,
    observers: Vec<Arc<dyn Observer>>,
    feed_config: &FeedConfig,
    health: &HealthRegistry,
) -> Result<()> {
    let feed = WatchFeed::new(
        kind,
        client.clone(),
        api,
        namespace,
        observers,
        feed_config.clone(),
    )
    .with_context(|| format!("Failed to create {kind} feed"))?
    .with_health(health.clone());

    info!(feed = %kind, url = %feed.url(), "Starting watch feed");
    tokio::spawn(async move {
        let err = feed.run().await;
        error!(feed = %kind, error = %err, "Watch feed stopped");
    });
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::WatcherConfig::load(cli.config.as_deref())?;
    init_tracing(config.log_json);

    let api = cli.api_base();
    let namespace = cli.namespace.as_deref();
    let logger = StructuredLogger::new(&api);
    logger.log_startup(VERSION, namespace);

    let token = read_token(&cli.token_path()?)?;
    let headers = auth_headers(&token).context("Invalid bearer token")?;
    let feed_config = config.feed_config();
    let tls = TlsSetting::from_ca_store(cli.ca_store.as_deref());
    let client = build_client(headers, &tls, &feed_config).context("Failed to build HTTP client")?;

    let since = config.since(Utc::now());
    let style = Style::new(cli.color());
    let alerts = config.alerts();
    info!(alerts = alerts.is_enabled(), since = %since, "Observers configured");

    let gauges = ResourceGauges::register(prometheus::default_registry())
        .context("Failed to register resource gauges")?;
    let engine: Arc<dyn Observer> = Arc::new(
        MetricsReconciler::new(gauges, since, config.node_type_gating).with_logger(logger.clone()),
    );

    // Console first so banners follow the line that triggered them
    let notifiers: Vec<Arc<dyn Observer>> = vec![
        Arc::new(Console::new(DedupCache::with_since(since), style)),
        Arc::new(PodOom::new(since, style, alerts.clone())),
        Arc::new(SystemOom::new(DedupCache::with_since(since), style, alerts.clone())),
        Arc::new(FailedPodKill::new(DedupCache::with_since(since), style, alerts)),
    ];
    let with_engine = || {
        let mut observers = notifiers.clone();
        observers.push(engine.clone());
        observers
    };

    let health = HealthRegistry::new();
    let state = Arc::new(api::AppState::new(health.clone()));
    let mut server = tokio::spawn(api::serve(config.metrics_port, state));

    // Node types and readiness should be known before pods are gated on them
    let start = |kind, observers| {
        spawn_feed(kind, &client, &api, namespace, observers, &feed_config, &health)
    };
    start(ResourceKind::Node, vec![engine.clone()])?;
    tokio::time::sleep(config.node_settle()).await;
    start(ResourceKind::Pod, with_engine())?;
    start(ResourceKind::Event, with_engine())?;
    if cli.projects || config.watch_projects {
        start(ResourceKind::Project, notifiers.clone())?;
    }
    health.set_ready(true).await;

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for shutdown signal")?;
            logger.log_shutdown("SIGINT received");
        }
        served = &mut server => {
            served.context("Metrics server task failed")??;
            logger.log_shutdown("metrics server exited");
        }
    }

    Ok(())
}
