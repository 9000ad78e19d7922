//! TaskDefine Controller
//!
//! Loads TaskDefine manifests into an in-memory store and reconciles them
//! until interrupted.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use taskdefine_controller::config::DEFAULT_LOG_FILTER;
use taskdefine_controller::{
    http, AppState, Controller, ControllerConfig, ControllerMetrics, InMemoryStore, NoopCleanup,
    Reconciler, StoreError,
};
use taskdefine_core::TaskDefine;

/// TaskDefine controller - reconciles TaskDefine resources
#[derive(Parser)]
#[command(name = "taskdefine-controller")]
#[command(about = "Reconciler for TaskDefine resources", long_about = None)]
struct Cli {
    /// JSON file holding an array of TaskDefine objects to load at startup
    #[arg(short, long)]
    manifests: Option<PathBuf>,

    /// Number of concurrent reconcile workers
    #[arg(short, long)]
    workers: Option<usize>,

    /// Health/metrics HTTP bind address
    #[arg(long)]
    http_addr: Option<String>,

    /// Disable the health/metrics HTTP server
    #[arg(long)]
    no_http: bool,

    /// Stop after this many seconds instead of waiting for Ctrl-C
    #[arg(long)]
    run_for: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_target(true)
        .init();

    let cli = Cli::parse();

    // Load config: defaults, then environment, then flags
    let mut config = ControllerConfig::from_env()?;
    if let Some(workers) = cli.workers {
        if workers == 0 {
            return Err("--workers must be at least 1".into());
        }
        config.workers = workers;
    }
    if let Some(addr) = cli.http_addr {
        config.http_bind_addr = addr;
    }

    let store = Arc::new(InMemoryStore::new());
    if let Some(path) = &cli.manifests {
        load_manifests(&store, path).await?;
    }

    let metrics = ControllerMetrics::new();
    let reconciler = Arc::new(Reconciler::with_metrics(
        store.clone(),
        Arc::new(NoopCleanup),
        config.requeue,
        metrics.clone(),
    ));

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Interrupt received");
                    shutdown.cancel();
                }
                Err(e) => warn!(error = %e, "Failed to listen for Ctrl-C"),
            }
        });
    }
    if let Some(secs) = cli.run_for {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            shutdown.cancel();
        });
    }

    // Start HTTP server
    let http_server = if cli.no_http {
        None
    } else {
        let listener = TcpListener::bind(&config.http_bind_addr).await?;
        info!(http_addr = %config.http_bind_addr, "HTTP server listening");
        let router = http::create_router(AppState::new(store.clone(), metrics.clone()));
        let shutdown = shutdown.clone();
        Some(tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
        }))
    };

    let initial = store.list().await.iter().map(TaskDefine::key).collect();
    let controller = Controller::new(reconciler, config);
    controller
        .run(store.subscribe(), initial, shutdown.clone())
        .await;

    if let Some(server) = http_server {
        if let Err(e) = server.await? {
            tracing::error!(error = %e, "HTTP server error");
        }
    }

    for object in store.list().await {
        info!(
            key = %object.key(),
            state = ?object.status.state,
            message = %object.status.message,
            finalizers = ?object.metadata.finalizers,
            "Final TaskDefine status"
        );
    }
    info!(
        reconciles = metrics.reconcile_success(),
        errors = metrics.reconcile_error(),
        status_writes = metrics.status_writes(),
        "Controller stopped"
    );

    Ok(())
}

async fn load_manifests(
    store: &InMemoryStore,
    path: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
        format!("Failed to read manifests from '{}': {}", path.display(), e)
    })?;
    let objects: Vec<TaskDefine> = serde_json::from_str(&raw)
        .map_err(|e| format!("Failed to parse manifests in '{}': {}", path.display(), e))?;

    for object in objects {
        let key = object.key();
        match store.create(object).await {
            Ok(_) => info!(key = %key, "Loaded TaskDefine"),
            Err(StoreError::AlreadyExists(_)) => warn!(key = %key, "Duplicate TaskDefine skipped"),
            Err(e) => return Err(e.into()),
        }
    }

    Ok(())
}
