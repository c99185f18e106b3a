#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Marketplace Sync - Real-time Synchronization Layer
//!
//! Keeps a user's notification list and the public live-listings feed
//! consistent with the marketplace backend. Runs on live push subscriptions
//! when the backend is configured and on simulated data when it is not.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure types
//!   - `notification`: Notifications and the bounded, de-duplicated list
//!   - `listing`: Listing snapshot items, feed stats, display window
//!   - `session`: Authenticated identity
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: The event source contract (snapshots and subscriptions)
//!   - `services`: Notification channel, simulator, live feed, session binding
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `event_source`: Hosted REST/realtime adapter and in-memory adapter
//!   - `config`: Environment configuration
//!   - `health`: Health check and HTTP surface
//!
//! # Data Flow
//!
//! ```text
//! session watch ──► NotificationChannelManager ◄── notifications / messages subscriptions
//!                          │                         (or SimulatedEventGenerator)
//!                          ▼
//!                  NotificationFeed ──► HTTP /notifications
//!
//! listings snapshot ──► LiveFeedRotator ──(every 5s)──► DisplayWindow ──► HTTP /feed
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::listing::{DisplayWindow, FeedStats, ListingSnapshotItem, ListingStatus};
pub use domain::notification::{
    Notification, NotificationCategory, NotificationFeed, NotificationInput,
};
pub use domain::session::{Session, UserId};

// Ports
pub use application::ports::{
    EventSourcePort, Filter, Record, SnapshotQuery, Subscription, SubscriptionHandle, Topic,
    TransportError,
};

// Services
pub use application::services::{
    ChannelConfig, ChannelMode, FeedConfig, LiveFeedRotator, NotificationChannelManager,
    SimulatedEventGenerator, SimulatorConfig, follow_sessions,
};

// Infrastructure config
pub use infrastructure::config::{ConfigError, Credentials, SyncConfig};

// Event sources
pub use infrastructure::event_source::{InMemoryEventSource, RemoteConfig, RemoteEventSource};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
