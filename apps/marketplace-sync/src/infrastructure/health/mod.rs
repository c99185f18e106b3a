//! Health Check and HTTP Surface
//!
//! HTTP endpoint for health checks, Prometheus metrics, and the consumer
//! operations of the notification channel and live feed.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Kubernetes liveness probe (simple OK)
//! - `GET /readyz` - Kubernetes readiness probe
//! - `GET /metrics` - Prometheus metrics in text format
//! - `GET /notifications` - Notification list and unread count
//! - `POST /notifications/{id}/read` - Mark one notification as read
//! - `POST /notifications/read-all` - Mark every notification as read
//! - `GET /feed` - Displayed listings, stats and live flag
//! - `POST /feed/toggle` - Pause or resume rotation

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::ports::EventSourcePort;
use crate::application::services::{ChannelMode, LiveFeedRotator, NotificationChannelManager};
use crate::domain::listing::{FeedStats, ListingSnapshotItem};
use crate::domain::notification::Notification;
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Notification channel status.
    pub channel: ChannelStatus,
    /// Live feed status.
    pub feed: FeedStatus,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// All systems operational.
    Healthy,
    /// Running on simulated data or with a missing subscription.
    Degraded,
    /// Bound but receiving no live updates.
    Unhealthy,
}

/// Notification channel status.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelStatus {
    /// `unbound`, `bound` or `fallback`.
    pub mode: &'static str,
    /// Bound user, if any.
    pub user_id: Option<String>,
    /// Open subscription handles.
    pub active_subscriptions: usize,
    /// Notifications held.
    pub notifications: usize,
    /// Unread notifications.
    pub unread: usize,
    /// Stale completions discarded.
    pub discarded_events: u64,
}

/// Live feed status.
#[derive(Debug, Clone, Serialize)]
pub struct FeedStatus {
    /// Whether the window is rotating.
    pub live: bool,
    /// Listings in the snapshot.
    pub snapshot_len: usize,
    /// Current window offset.
    pub offset: usize,
}

#[derive(Debug, Serialize)]
struct NotificationsResponse {
    notifications: Vec<Notification>,
    unread_count: usize,
}

#[derive(Debug, Serialize)]
struct MarkReadResponse {
    changed: usize,
    unread_count: usize,
}

#[derive(Debug, Serialize)]
struct FeedResponse {
    items: Vec<ListingSnapshotItem>,
    stats: FeedStats,
    is_live: bool,
    offset: usize,
}

#[derive(Debug, Serialize)]
struct ToggleResponse {
    is_live: bool,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState<S> {
    version: String,
    started_at: Instant,
    channel: Arc<NotificationChannelManager<S>>,
    feed: Arc<LiveFeedRotator<S>>,
}

impl<S> HealthServerState<S> {
    /// Create new health server state.
    #[must_use]
    pub fn new(
        version: String,
        channel: Arc<NotificationChannelManager<S>>,
        feed: Arc<LiveFeedRotator<S>>,
    ) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            channel,
            feed,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer<S> {
    port: u16,
    state: Arc<HealthServerState<S>>,
    cancel: CancellationToken,
}

impl<S: EventSourcePort + 'static> HealthServer<S> {
    /// Create a new health server.
    #[must_use]
    pub const fn new(
        port: u16,
        state: Arc<HealthServerState<S>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let app = router(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

/// Build the HTTP router.
#[must_use]
pub fn router<S: EventSourcePort + 'static>(state: Arc<HealthServerState<S>>) -> Router {
    Router::new()
        .route("/health", get(health_handler::<S>))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler::<S>))
        .route("/metrics", get(metrics_handler))
        .route("/notifications", get(notifications_handler::<S>))
        .route("/notifications/read-all", post(mark_all_read_handler::<S>))
        .route("/notifications/{id}/read", post(mark_read_handler::<S>))
        .route("/feed", get(feed_handler::<S>))
        .route("/feed/toggle", post(toggle_feed_handler::<S>))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler<S: EventSourcePort + 'static>(
    State(state): State<Arc<HealthServerState<S>>>,
) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler<S: EventSourcePort + 'static>(
    State(state): State<Arc<HealthServerState<S>>>,
) -> impl IntoResponse {
    let response = build_health_response(&state);

    if response.status == HealthStatus::Unhealthy {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    } else {
        (StatusCode::OK, "READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

async fn notifications_handler<S: EventSourcePort + 'static>(
    State(state): State<Arc<HealthServerState<S>>>,
) -> impl IntoResponse {
    Json(NotificationsResponse {
        notifications: state.channel.notifications(),
        unread_count: state.channel.unread_count(),
    })
}

async fn mark_read_handler<S: EventSourcePort + 'static>(
    State(state): State<Arc<HealthServerState<S>>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let changed = usize::from(state.channel.mark_as_read(&id));
    Json(MarkReadResponse {
        changed,
        unread_count: state.channel.unread_count(),
    })
}

async fn mark_all_read_handler<S: EventSourcePort + 'static>(
    State(state): State<Arc<HealthServerState<S>>>,
) -> impl IntoResponse {
    let changed = state.channel.mark_all_as_read();
    Json(MarkReadResponse {
        changed,
        unread_count: state.channel.unread_count(),
    })
}

async fn feed_handler<S: EventSourcePort + 'static>(
    State(state): State<Arc<HealthServerState<S>>>,
) -> impl IntoResponse {
    Json(FeedResponse {
        items: state.feed.displayed_items(),
        stats: state.feed.stats(),
        is_live: state.feed.is_live(),
        offset: state.feed.offset(),
    })
}

async fn toggle_feed_handler<S: EventSourcePort + 'static>(
    State(state): State<Arc<HealthServerState<S>>>,
) -> impl IntoResponse {
    let is_live = state.feed.toggle_live();
    tracing::info!(is_live, "Live feed toggled");
    Json(ToggleResponse { is_live })
}

fn build_health_response<S: EventSourcePort + 'static>(
    state: &HealthServerState<S>,
) -> HealthResponse {
    let mode = state.channel.mode();
    let active_subscriptions = state.channel.active_subscriptions();

    HealthResponse {
        status: determine_health_status(&mode, active_subscriptions),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        channel: ChannelStatus {
            mode: mode.as_str(),
            user_id: mode.user_id().map(ToString::to_string),
            active_subscriptions,
            notifications: state.channel.notifications().len(),
            unread: state.channel.unread_count(),
            discarded_events: state.channel.discarded_events(),
        },
        feed: FeedStatus {
            live: state.feed.is_live(),
            snapshot_len: state.feed.snapshot_len(),
            offset: state.feed.offset(),
        },
    }
}

fn determine_health_status(mode: &ChannelMode, active_subscriptions: usize) -> HealthStatus {
    match mode {
        ChannelMode::Unbound => HealthStatus::Healthy,
        ChannelMode::Fallback(_) => HealthStatus::Degraded,
        ChannelMode::Bound(_) => match active_subscriptions {
            0 => HealthStatus::Unhealthy,
            1 => HealthStatus::Degraded,
            _ => HealthStatus::Healthy,
        },
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::application::services::{ChannelConfig, FeedConfig};
    use crate::domain::notification::{NotificationCategory, NotificationInput};
    use crate::domain::session::UserId;
    use crate::infrastructure::event_source::InMemoryEventSource;

    async fn test_state() -> Arc<HealthServerState<InMemoryEventSource>> {
        let source = Arc::new(InMemoryEventSource::unavailable());
        let channel = Arc::new(NotificationChannelManager::new(
            Arc::clone(&source),
            ChannelConfig::default(),
        ));
        let feed = Arc::new(LiveFeedRotator::new(source, FeedConfig::default()));
        feed.load().await.unwrap();

        Arc::new(HealthServerState::new("0.1.0".to_string(), channel, feed))
    }

    async fn call(app: Router, method: &str, uri: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    #[test]
    fn health_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Healthy).unwrap(),
            "\"healthy\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Degraded).unwrap(),
            "\"degraded\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Unhealthy).unwrap(),
            "\"unhealthy\""
        );
    }

    #[test]
    fn determine_status_by_mode() {
        let user = UserId::from("u1");
        assert_eq!(
            determine_health_status(&ChannelMode::Unbound, 0),
            HealthStatus::Healthy
        );
        assert_eq!(
            determine_health_status(&ChannelMode::Fallback(user.clone()), 0),
            HealthStatus::Degraded
        );
        assert_eq!(
            determine_health_status(&ChannelMode::Bound(user.clone()), 2),
            HealthStatus::Healthy
        );
        assert_eq!(
            determine_health_status(&ChannelMode::Bound(user.clone()), 1),
            HealthStatus::Degraded
        );
        assert_eq!(
            determine_health_status(&ChannelMode::Bound(user), 0),
            HealthStatus::Unhealthy
        );
    }

    #[tokio::test]
    async fn health_reports_channel_and_feed() {
        let state = test_state().await;
        let (status, body) = call(router(state), "GET", "/health").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["channel"]["mode"], "unbound");
        assert_eq!(body["feed"]["live"], true);
        assert_eq!(body["feed"]["snapshot_len"], 6);
    }

    #[tokio::test]
    async fn mark_read_round_trip() {
        let state = test_state().await;
        let first = state.channel.add_notification(NotificationInput::new(
            "Visit request",
            "Saturday",
            NotificationCategory::Info,
        ));
        state.channel.add_notification(NotificationInput::new(
            "Price drop",
            "-5%",
            NotificationCategory::Success,
        ));

        let (_, body) = call(router(Arc::clone(&state)), "GET", "/notifications").await;
        assert_eq!(body["unread_count"], 2);
        assert_eq!(body["notifications"][0]["title"], "Price drop");

        let uri = format!("/notifications/{}/read", first.id);
        let (status, body) = call(router(Arc::clone(&state)), "POST", &uri).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["changed"], 1);
        assert_eq!(body["unread_count"], 1);

        let (_, body) = call(router(Arc::clone(&state)), "POST", &uri).await;
        assert_eq!(body["changed"], 0);

        let (_, body) = call(router(state), "POST", "/notifications/read-all").await;
        assert_eq!(body["changed"], 1);
        assert_eq!(body["unread_count"], 0);
    }

    #[tokio::test]
    async fn feed_toggle() {
        let state = test_state().await;

        let (_, body) = call(router(Arc::clone(&state)), "GET", "/feed").await;
        assert_eq!(body["items"].as_array().unwrap().len(), 3);
        assert_eq!(body["is_live"], true);
        assert_eq!(body["stats"]["count"], 6);

        let (_, body) = call(router(Arc::clone(&state)), "POST", "/feed/toggle").await;
        assert_eq!(body["is_live"], false);
        assert!(!state.feed.is_live());
    }

    #[tokio::test]
    async fn liveness_is_plain_ok() {
        let response = router(test_state().await)
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
