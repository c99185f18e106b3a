//! Marketplace Sync Binary
//!
//! Starts the notification channel, the live listings feed, and the HTTP
//! surface.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin marketplace-sync
//! ```
//!
//! # Environment Variables
//!
//! All optional. Without a backend endpoint and key the service runs on
//! simulated notifications and demo listings.
//!
//! - `SYNC_BACKEND_URL`: Backend base URL
//! - `SYNC_BACKEND_KEY`: Backend API key
//! - `SYNC_USER_ID`: User bound at startup
//! - `NOTIFICATION_SNAPSHOT_LIMIT`: Notifications fetched on bind (default: 50)
//! - `NOTIFICATION_CAPACITY`: Notifications kept in memory (default: 500)
//! - `SIMULATOR_INTERVAL_SECS`: Simulated event tick (default: 30)
//! - `SIMULATOR_PROBABILITY`: Chance a tick emits (default: 0.3)
//! - `FEED_LIMIT`: Listings per snapshot (default: 20)
//! - `FEED_WINDOW_SIZE`: Listings shown at once (default: 3)
//! - `FEED_ROTATE_INTERVAL_SECS`: Rotation period (default: 5)
//! - `SYNC_HEALTH_PORT`: HTTP port (default: 8083)
//! - `OTEL_ENABLED`: Export traces over OTLP (default: false)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use marketplace_sync::infrastructure::health::{HealthServer, HealthServerState};
use marketplace_sync::infrastructure::telemetry;
use marketplace_sync::{
    LiveFeedRotator, NotificationChannelManager, RemoteConfig, RemoteEventSource, Session,
    SyncConfig, follow_sessions, init_metrics,
};
use tokio::signal;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting Marketplace Sync");

    let _metrics_handle = init_metrics();

    let config = SyncConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let source = Arc::new(
        RemoteEventSource::new(config.backend.clone(), RemoteConfig::default())
            .context("failed to build event source")?,
    );

    // Notification channel, driven by the session watch
    let channel = Arc::new(NotificationChannelManager::new(
        Arc::clone(&source),
        config.channel_config(),
    ));
    let (session_tx, session_rx) = watch::channel(config.user_id.clone().map(Session::new));
    let session_task = tokio::spawn(follow_sessions(
        Arc::clone(&channel),
        session_rx,
        shutdown_token.clone(),
    ));

    // Live feed
    let feed = Arc::new(LiveFeedRotator::new(
        Arc::clone(&source),
        config.feed_config(),
    ));
    if let Err(e) = feed.load().await {
        tracing::warn!(error = %e, "Initial listings load failed, feed starts empty");
    }
    let rotation_task = feed.start();

    // HTTP surface
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&channel),
        Arc::clone(&feed),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    let health_task = tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    tracing::info!("Marketplace sync ready");

    await_shutdown(shutdown_token).await;

    feed.shutdown();
    let teardown = async {
        let _ = session_task.await;
        channel.shutdown();
        if let Some(task) = rotation_task {
            let _ = task.await;
        }
        let _ = health_task.await;
    };
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, teardown).await.is_err() {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Graceful shutdown timed out"
        );
    }
    drop(session_tx);

    tracing::info!("Marketplace sync stopped");
    Ok(())
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &SyncConfig) {
    tracing::info!(
        backend_configured = config.backend.is_configured(),
        user_id = config.user_id.as_ref().map_or("none", |u| u.as_str()),
        health_port = config.server.health_port,
        "Configuration loaded"
    );
    tracing::debug!(
        snapshot_limit = config.notifications.snapshot_limit,
        capacity = config.notifications.capacity,
        simulator_interval_secs = config.simulator.interval.as_secs(),
        simulator_probability = config.simulator.probability,
        feed_limit = config.feed.limit,
        window_size = config.feed.window_size,
        rotate_interval_secs = config.feed.rotate_interval.as_secs(),
        "Sync settings"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
