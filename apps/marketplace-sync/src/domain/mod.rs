//! Domain Layer - Core synchronization types.
//!
//! Pure types for the notification list, the listings feed, and session
//! identity. Nothing here performs I/O; records are decoded from JSON values
//! handed in by the application layer.

/// Listing snapshot items, feed statistics, and the display window.
pub mod listing;

/// Notifications, chat messages, and the bounded notification feed.
pub mod notification;

/// Backend record helpers.
pub mod record;

/// Session identity.
pub mod session;
