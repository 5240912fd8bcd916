//! Caching forward proxy
//!
//! Serves `GET` requests from a memory tier, then a SQLite-backed persistent
//! tier, and only then from the origin.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mini_proxy_cache::api::{create_router, AppState};
use mini_proxy_cache::cache::{CacheCoordinator, VolatileCache, WriteBatcher};
use mini_proxy_cache::config::Config;
use mini_proxy_cache::storage::{EntryStore, SqliteStore};
use mini_proxy_cache::tasks::{spawn_flush_task, spawn_sweep_task};
use mini_proxy_cache::upstream::HttpUpstream;

/// Main entry point for the caching proxy.
///
/// # Startup Sequence
/// 1. Load `.env` and configuration from environment variables
/// 2. Initialize tracing (stdout plus optional log file)
/// 3. Open the persistent store and verify its integrity
/// 4. Wire the memory tier, write batcher, upstream client and coordinator
/// 5. Start the flush and TTL sweep tasks
/// 6. Serve until SIGINT/SIGTERM
///
/// # Shutdown Sequence
/// Stop accepting, drain in-flight requests, stop the background tasks,
/// flush pending writes once more, then close the database.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env();
    let _log_guard = init_tracing(&config)?;

    info!("Starting caching proxy");
    info!(
        port = config.port,
        db_path = %config.db_path.display(),
        ttl_seconds = config.ttl_seconds,
        max_memory_entries = config.max_memory_entries,
        batch_max_size = config.batch_max_size,
        batch_max_delay_seconds = config.batch_max_delay_seconds,
        max_connections = config.max_connections,
        "Configuration loaded"
    );

    let sqlite = Arc::new(
        SqliteStore::open(&config.db_path)
            .await
            .with_context(|| {
                format!("failed to open cache database {}", config.db_path.display())
            })?,
    );
    let store: Arc<dyn EntryStore> = sqlite.clone();

    let memory = Arc::new(RwLock::new(VolatileCache::new(config.max_memory_entries)));
    let batcher = Arc::new(WriteBatcher::new(store.clone(), config.batch_config()));
    let upstream = Arc::new(
        HttpUpstream::new(config.upstream_timeout()).context("failed to build upstream client")?,
    );
    let coordinator = Arc::new(CacheCoordinator::new(
        memory.clone(),
        store.clone(),
        batcher.clone(),
        upstream,
        config.ttl(),
    ));

    let shutdown = CancellationToken::new();
    let flush_handle = spawn_flush_task(batcher.clone(), shutdown.clone());
    let sweep_handle = spawn_sweep_task(memory, store, config.sweep_interval(), shutdown.clone());

    let state = AppState::new(coordinator, config.key_header_names());
    let app = create_router(state, config.max_connections);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("Proxy listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("Stopped accepting requests, stopping background tasks");
    shutdown.cancel();
    for (name, handle) in [("flush", flush_handle), ("sweep", sweep_handle)] {
        if let Err(err) = handle.await {
            warn!(task = name, error = %err, "background task ended abnormally");
        }
    }

    match batcher.flush().await {
        Ok(flushed) => info!(entries = flushed, "Final flush complete"),
        Err(err) => error!(error = %err, "Final flush failed, pending writes were not persisted"),
    }
    sqlite.close().await;

    info!("Shutdown complete");
    Ok(())
}

/// Installs the global subscriber. The returned guard must live until exit so
/// buffered file output is written.
fn init_tracing(config: &Config) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "mini_proxy_cache=info,tower_http=info".into());

    let (file_layer, guard) = match &config.log_file {
        Some(path) => {
            let directory = path
                .parent()
                .filter(|dir| !dir.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let file_name = path
                .file_name()
                .with_context(|| format!("LOG_FILE `{}` has no file name", path.display()))?;

            let appender = tracing_appender::rolling::never(directory, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .init();

    Ok(guard)
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }
}
