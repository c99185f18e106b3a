//! Sync Configuration Settings
//!
//! Configuration types for the synchronization service, loaded from
//! environment variables. A missing backend endpoint or key is not an error:
//! it selects the simulated mode.

use std::time::Duration;

use crate::application::services::{ChannelConfig, FeedConfig, SimulatorConfig};
use crate::domain::listing::DEFAULT_WINDOW_SIZE;
use crate::domain::notification::DEFAULT_CAPACITY;
use crate::domain::session::UserId;

/// Backend API credentials.
#[derive(Clone)]
pub struct Credentials {
    api_key: String,
}

impl Credentials {
    /// Create new credentials.
    #[must_use]
    pub const fn new(api_key: String) -> Self {
        Self { api_key }
    }

    /// Get the API key.
    #[must_use]
    pub fn api_key(&self) -> &str {
        &self.api_key
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

/// Backend endpoint and credential.
#[derive(Debug, Clone, Default)]
pub struct BackendSettings {
    /// Base URL of the backend (`https://project.example.co`).
    pub endpoint: Option<String>,
    /// API credential.
    pub credentials: Option<Credentials>,
}

impl BackendSettings {
    /// Whether both endpoint and credential are present.
    #[must_use]
    pub const fn is_configured(&self) -> bool {
        self.endpoint.is_some() && self.credentials.is_some()
    }
}

/// Notification channel settings.
#[derive(Debug, Clone)]
pub struct NotificationSettings {
    /// Existing notifications fetched on bind.
    pub snapshot_limit: usize,
    /// Maximum notifications kept in memory.
    pub capacity: usize,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            snapshot_limit: 50,
            capacity: DEFAULT_CAPACITY,
        }
    }
}

/// Simulated event generator settings.
#[derive(Debug, Clone)]
pub struct SimulatorSettings {
    /// Time between ticks.
    pub interval: Duration,
    /// Probability that a tick emits a notification.
    pub probability: f64,
}

impl Default for SimulatorSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            probability: 0.3,
        }
    }
}

/// Live feed settings.
#[derive(Debug, Clone)]
pub struct FeedSettings {
    /// Maximum listings per snapshot.
    pub limit: usize,
    /// Listings shown at once.
    pub window_size: usize,
    /// Time between rotations.
    pub rotate_interval: Duration,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            limit: 20,
            window_size: DEFAULT_WINDOW_SIZE,
            rotate_interval: Duration::from_secs(5),
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Health check and HTTP surface port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8083 }
    }
}

/// Complete service configuration.
#[derive(Debug, Clone, Default)]
pub struct SyncConfig {
    /// Backend connection.
    pub backend: BackendSettings,
    /// Identity bound at startup, if any.
    pub user_id: Option<UserId>,
    /// Notification channel settings.
    pub notifications: NotificationSettings,
    /// Simulator settings.
    pub simulator: SimulatorSettings,
    /// Live feed settings.
    pub feed: FeedSettings,
    /// Server port settings.
    pub server: ServerSettings,
}

impl SyncConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a value is out of range.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// Empty values count as absent. Values that do not parse fall back to
    /// their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a value is out of range.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let backend = BackendSettings {
            endpoint: get("SYNC_BACKEND_URL").map(|url| url.trim_end_matches('/').to_string()),
            credentials: get("SYNC_BACKEND_KEY").map(Credentials::new),
        };

        let user_id = get("SYNC_USER_ID").map(UserId::new);

        let notifications = NotificationSettings {
            snapshot_limit: parse_usize(
                &get,
                "NOTIFICATION_SNAPSHOT_LIMIT",
                NotificationSettings::default().snapshot_limit,
            ),
            capacity: parse_usize(
                &get,
                "NOTIFICATION_CAPACITY",
                NotificationSettings::default().capacity,
            ),
        };

        let simulator = SimulatorSettings {
            interval: parse_duration_secs(
                &get,
                "SIMULATOR_INTERVAL_SECS",
                SimulatorSettings::default().interval,
            ),
            probability: parse_f64(
                &get,
                "SIMULATOR_PROBABILITY",
                SimulatorSettings::default().probability,
            ),
        };

        let feed = FeedSettings {
            limit: parse_usize(&get, "FEED_LIMIT", FeedSettings::default().limit),
            window_size: parse_usize(&get, "FEED_WINDOW_SIZE", FeedSettings::default().window_size),
            rotate_interval: parse_duration_secs(
                &get,
                "FEED_ROTATE_INTERVAL_SECS",
                FeedSettings::default().rotate_interval,
            ),
        };

        let server = ServerSettings {
            health_port: get("SYNC_HEALTH_PORT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(ServerSettings::default().health_port),
        };

        let config = Self {
            backend,
            user_id,
            notifications,
            simulator,
            feed,
            server,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.simulator.probability) {
            return Err(ConfigError::InvalidValue {
                key: "SIMULATOR_PROBABILITY",
                reason: "must be between 0 and 1".to_string(),
            });
        }

        let non_zero = [
            ("NOTIFICATION_SNAPSHOT_LIMIT", self.notifications.snapshot_limit == 0),
            ("NOTIFICATION_CAPACITY", self.notifications.capacity == 0),
            ("FEED_LIMIT", self.feed.limit == 0),
            ("FEED_WINDOW_SIZE", self.feed.window_size == 0),
            ("SIMULATOR_INTERVAL_SECS", self.simulator.interval.is_zero()),
            ("FEED_ROTATE_INTERVAL_SECS", self.feed.rotate_interval.is_zero()),
        ];
        if let Some((key, _)) = non_zero.into_iter().find(|(_, is_zero)| *is_zero) {
            return Err(ConfigError::InvalidValue {
                key,
                reason: "must be greater than zero".to_string(),
            });
        }

        Ok(())
    }

    /// Notification channel configuration.
    #[must_use]
    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            snapshot_limit: self.notifications.snapshot_limit,
            capacity: self.notifications.capacity,
            simulator: SimulatorConfig {
                interval: self.simulator.interval,
                probability: self.simulator.probability,
                seed: None,
            },
        }
    }

    /// Live feed configuration.
    #[must_use]
    pub const fn feed_config(&self) -> FeedConfig {
        FeedConfig {
            limit: self.feed.limit,
            window_size: self.feed.window_size,
            rotate_interval: self.feed.rotate_interval,
        }
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has an out-of-range value.
    #[error("invalid value for {key}: {reason}")]
    InvalidValue {
        /// Variable name.
        key: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

fn parse_usize(get: &impl Fn(&str) -> Option<String>, key: &str, default: usize) -> usize {
    get(key).and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

fn parse_f64(get: &impl Fn(&str) -> Option<String>, key: &str, default: f64) -> f64 {
    get(key).and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

fn parse_duration_secs(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Duration {
    get(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}
