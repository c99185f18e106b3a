//! Port Interfaces
//!
//! Contracts the application services consume. Infrastructure adapters
//! implement them.
//!
//! ## Driven Ports (Outbound)
//!
//! - `EventSourcePort`: snapshot queries and push subscriptions against the
//!   marketplace backend

mod event_source_port;

#[cfg(test)]
pub use event_source_port::MockEventSourcePort;
pub use event_source_port::{
    EventSourcePort, Filter, SnapshotQuery, Subscription, SubscriptionHandle, Topic,
    TransportError,
};

pub use crate::domain::record::Record;
