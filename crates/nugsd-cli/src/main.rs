//! Server entry point - the composition root.
//!
//! This is the only place where infrastructure is wired together: config
//! load, logging, HTTP clients, the hub dispatcher, the worker, the progress
//! consumer, and the Axum server.

use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use nugsd_axum::{create_router, ApiContext};
use nugsd_core::AppConfig;
use nugsd_download::{
    build_clients, hub::hub, spawn_progress_consumer, spawn_worker, Downloader, JobRunner,
    QueueManager,
};

/// Capacity of the downloader → consumer progress channel. Bounded to smooth
/// bursts; drop-on-full keeps memory flat under backpressure.
const PROGRESS_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Parser)]
#[command(name = "nugsd", about = "Background download service for nugs.net")]
struct Cli {
    /// Path to the configuration document.
    #[arg(long, default_value = "config.json")]
    config: PathBuf,

    /// Port for the HTTP admin server.
    #[arg(long, default_value_t = 8080)]
    port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Configuration errors are fatal to startup
    let config = AppConfig::load(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    let _log_guard = init_tracing(&config);
    info!(config = %cli.config.display(), "Configuration loaded");

    let (client, redirect_client) = build_clients().context("failed to build HTTP clients")?;

    let shared_config = Arc::new(RwLock::new(config));
    let queue = Arc::new(QueueManager::new());
    let (hub_handle, dispatcher) = hub();
    tokio::spawn(dispatcher.run());

    let (progress_tx, progress_rx) = tokio::sync::mpsc::channel(PROGRESS_CHANNEL_CAPACITY);
    spawn_progress_consumer(progress_rx, Arc::clone(&queue), hub_handle.clone());

    let downloader: Arc<dyn JobRunner> = Arc::new(Downloader::new(
        Arc::clone(&shared_config),
        client,
        redirect_client,
        progress_tx,
        Arc::clone(&queue) as Arc<dyn nugsd_download::JobStore>,
    ));
    spawn_worker(Arc::clone(&queue), downloader, hub_handle.clone());

    let state = Arc::new(ApiContext {
        queue,
        hub: hub_handle,
        config: shared_config,
        config_path: cli.config,
    });
    let router = create_router(state);

    let addr = format!("0.0.0.0:{}", cli.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(addr = %addr, "Starting server");
    axum::serve(listener, router).await.context("server error")?;
    Ok(())
}

/// Initialise tracing: env filter (falling back to the configured level),
/// compact stdout output, and an optional daily-rolling file appender.
///
/// The returned guard must stay alive for the process lifetime so buffered
/// log lines are flushed.
fn init_tracing(config: &AppConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.log_level.clone()));

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stdout)
        .compact();

    if config.log_dir.is_empty() {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stdout_layer)
            .init();
        return None;
    }

    let file_appender = tracing_appender::rolling::daily(&config.log_dir, "nugsd");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false),
        )
        .init();
    Some(guard)
}
