//! Configuration Module
//!
//! Configuration loading for the synchronization service.

mod settings;

pub use settings::{
    BackendSettings, ConfigError, Credentials, FeedSettings, NotificationSettings, ServerSettings,
    SimulatorSettings, SyncConfig,
};
