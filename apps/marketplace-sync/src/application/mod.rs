//! Application Layer - Use cases and port definitions.
//!
//! Services that reconcile backend events with local state, and the port
//! they consume the backend through.

/// Port interfaces for external systems.
pub mod ports;

/// Notification channel, simulated events, live feed, and session binding.
pub mod services;
