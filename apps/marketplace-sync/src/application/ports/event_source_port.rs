//! Event Source Port (Driven Port)
//!
//! Interface to the marketplace backend: point-in-time snapshot queries and
//! push subscriptions to inserted records.
//!
//! Delivery order within one subscription is whatever the backend delivers;
//! adapters forward records as received and never reorder them.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::domain::record::{Record, value_to_id};

// =============================================================================
// Topics and Filters
// =============================================================================

/// A named category of backend records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Direct notifications addressed to a user.
    Notifications,
    /// Chat messages across all sessions.
    Messages,
    /// Membership of chat sessions.
    ChatParticipants,
    /// Public property listings.
    Listings,
}

impl Topic {
    /// Backing table name.
    #[must_use]
    pub const fn table(self) -> &'static str {
        match self {
            Self::Notifications => "notifications",
            Self::Messages => "messages",
            Self::ChatParticipants => "chat_participants",
            Self::Listings => "listings",
        }
    }
}

/// Row-level equality filter (`column = value`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    /// Column to compare.
    pub column: String,
    /// Expected value.
    pub value: String,
}

impl Filter {
    /// Create an equality filter.
    #[must_use]
    pub fn eq(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }

    /// Check whether a record satisfies the filter.
    #[must_use]
    pub fn matches(&self, record: &Record) -> bool {
        record
            .get(&self.column)
            .and_then(value_to_id)
            .is_some_and(|v| v == self.value)
    }
}

/// A snapshot query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotQuery {
    /// Topic to read.
    pub topic: Topic,
    /// Maximum number of records.
    pub limit: usize,
    /// Optional row filter.
    pub filter: Option<Filter>,
}

impl SnapshotQuery {
    /// Query the most recent `limit` records of a topic.
    #[must_use]
    pub const fn new(topic: Topic, limit: usize) -> Self {
        Self {
            topic,
            limit,
            filter: None,
        }
    }

    /// Restrict the query with a filter.
    #[must_use]
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }
}

// =============================================================================
// Subscriptions
// =============================================================================

/// Handle to one open subscription.
///
/// Closing is idempotent; dropping the handle closes it.
#[derive(Debug)]
pub struct SubscriptionHandle {
    topic: Topic,
    token: CancellationToken,
}

impl SubscriptionHandle {
    /// Create a handle that cancels `token` when closed.
    #[must_use]
    pub const fn new(topic: Topic, token: CancellationToken) -> Self {
        Self { topic, token }
    }

    /// Topic this handle is subscribed to.
    #[must_use]
    pub const fn topic(&self) -> Topic {
        self.topic
    }

    /// Release the underlying connection.
    pub fn close(&self) {
        self.token.cancel();
    }

    /// Check whether the handle has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.close();
    }
}

/// An open subscription: the ordered record stream plus its handle.
#[derive(Debug)]
pub struct Subscription {
    /// Inserted records, in delivery order.
    pub events: mpsc::Receiver<Record>,
    /// Handle releasing the subscription.
    pub handle: SubscriptionHandle,
}

// =============================================================================
// Errors
// =============================================================================

/// Transport failure on fetch or subscribe.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// No endpoint or credential configured.
    #[error("event source is not configured")]
    NotConfigured,

    /// The request could not be sent or completed.
    #[error("request failed: {message}")]
    Request {
        /// Error details.
        message: String,
    },

    /// The backend answered with a non-success status.
    #[error("backend returned status {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body or reason.
        message: String,
    },

    /// The response body could not be decoded.
    #[error("failed to decode response: {message}")]
    Decode {
        /// Error details.
        message: String,
    },

    /// The subscription could not be opened.
    #[error("subscription failed: {message}")]
    Subscribe {
        /// Error details.
        message: String,
    },
}

// =============================================================================
// Port
// =============================================================================

/// Port for reading from and subscribing to the marketplace backend.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventSourcePort: Send + Sync {
    /// Whether both an endpoint and a credential are configured.
    fn is_available(&self) -> bool;

    /// Fetch the most recent records of a topic, most-recent-first.
    async fn fetch_snapshot(&self, query: SnapshotQuery) -> Result<Vec<Record>, TransportError>;

    /// Subscribe to records inserted into a topic, optionally filtered.
    async fn subscribe(
        &self,
        topic: Topic,
        filter: Option<Filter>,
    ) -> Result<Subscription, TransportError>;
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn filter_matches_string_and_numeric_columns() {
        let filter = Filter::eq("user_id", "7");
        assert!(filter.matches(&json!({"user_id": 7})));
        assert!(filter.matches(&json!({"user_id": "7"})));
        assert!(!filter.matches(&json!({"user_id": "8"})));
        assert!(!filter.matches(&json!({"other": "7"})));
    }

    #[test]
    fn handle_close_is_idempotent() {
        let token = CancellationToken::new();
        let handle = SubscriptionHandle::new(Topic::Messages, token.clone());

        handle.close();
        handle.close();

        assert!(handle.is_closed());
        assert!(token.is_cancelled());
        assert_eq!(handle.topic(), Topic::Messages);
    }

    #[test]
    fn dropping_handle_closes_it() {
        let token = CancellationToken::new();
        drop(SubscriptionHandle::new(Topic::Notifications, token.clone()));
        assert!(token.is_cancelled());
    }

    #[test]
    fn snapshot_query_builder() {
        let query = SnapshotQuery::new(Topic::Listings, 20).with_filter(Filter::eq("status", "active"));
        assert_eq!(query.limit, 20);
        assert_eq!(query.filter, Some(Filter::eq("status", "active")));
    }

    #[test]
    fn topic_tables() {
        assert_eq!(Topic::Notifications.table(), "notifications");
        assert_eq!(Topic::Messages.table(), "messages");
        assert_eq!(Topic::ChatParticipants.table(), "chat_participants");
        assert_eq!(Topic::Listings.table(), "listings");
    }
}
