//! webink-server: snapshot server binary.
//!
//! Loads the device configuration named by `WEBINK_CONFIG_PATH`, builds
//! the registry, render engine and snapshot cache in that order, then
//! runs the HTTP and socket front-ends until a shutdown signal arrives.
//! Startup failures (bad configuration, unbindable port) exit non-zero
//! before any listener starts serving.

use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use tokio::net::TcpListener;
use tokio::sync::watch;

use webink::http::{router, AppState};
use webink::{config, DeviceLogs, DeviceRegistry, RenderEngine, SnapshotCache, TileSocketServer};

/// How long in-flight handlers get to drain after the shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() {
    env_logger::init();
    if let Err(e) = run().await {
        error!("Fatal: {e}");
        std::process::exit(1);
    }
}

async fn run() -> webink::Result<()> {
    let path = config::config_path();
    let cfg = config::load(&path)?;
    info!("Loaded {} device(s) from {path}", cfg.devices.len());

    // Initialization order: registry, render engine, snapshot cache,
    // then the two front-ends sharing them.
    let registry = Arc::new(DeviceRegistry::from_config(&cfg.devices)?);
    let engine = Arc::new(RenderEngine::new(
        cfg.server.browser_pool,
        Duration::from_secs(cfg.server.pool_wait_secs),
        Duration::from_secs(cfg.server.navigation_secs),
    ));
    let wait_cap = engine.capture_budget();
    let cache = Arc::new(SnapshotCache::new(engine, &registry, wait_cap));
    let logs = Arc::new(DeviceLogs::new(&registry));

    let http_listener = TcpListener::bind(("0.0.0.0", cfg.server.http_port)).await?;
    let socket_listener = TcpListener::bind(("0.0.0.0", cfg.server.socket_port)).await?;
    info!(
        "Serving HTTP on port {} and tile socket on port {}",
        cfg.server.http_port, cfg.server.socket_port
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let socket_server = Arc::new(TileSocketServer::new(
        registry.clone(),
        cache.clone(),
        cfg.server.max_socket_conns,
    ));
    let socket_task = tokio::spawn(socket_server.listen(socket_listener, shutdown_rx.clone()));

    let app = router(AppState { registry, cache, logs });
    let mut http_shutdown = shutdown_rx;
    let http_task = tokio::spawn(async move {
        axum::serve(http_listener, app)
            .with_graceful_shutdown(async move {
                let _ = http_shutdown.changed().await;
            })
            .await
    });

    shutdown_signal().await;
    info!("Shutdown signal received");
    let _ = shutdown_tx.send(true);

    // Front-ends drain first; cache and engine drop afterwards in
    // reverse initialization order.
    let drain = async {
        let _ = http_task.await;
        let _ = socket_task.await;
    };
    if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
        warn!("Grace period elapsed with handlers still in flight");
    }
    info!("Shutdown complete");
    Ok(())
}

/// Resolves on SIGINT, or on SIGTERM where that exists.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(e) => {
                warn!("SIGTERM handler unavailable: {e}");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
