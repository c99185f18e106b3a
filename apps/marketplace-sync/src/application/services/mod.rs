//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `NotificationChannelManager`: per-user notification list and its subscriptions
//! - `SimulatedEventGenerator`: synthetic notifications when no backend is configured
//! - `LiveFeedRotator`: listings snapshot, stats and rotating display window
//! - `follow_sessions`: rebinds the channel on identity changes

mod live_feed;
mod notification_channel;
mod session_binding;
mod simulator;

pub use live_feed::{FeedConfig, LiveFeedRotator, demo_catalog};
pub use notification_channel::{ChannelConfig, ChannelMode, NotificationChannelManager};
pub use session_binding::follow_sessions;
pub use simulator::{SimulatedEventGenerator, SimulatorConfig};
