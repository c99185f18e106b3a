//! Notification Types
//!
//! The per-user notification list and the records it is built from.
//!
//! # Invariants
//!
//! `NotificationFeed` keeps:
//! - most-recent-first ordering (new arrivals are prepended)
//! - unique ids (inserting a known id is a no-op)
//! - `unread_count() == entries with read == false`
//! - at most `capacity` entries, evicting the oldest read entry first

use std::collections::{HashSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::record::{Record, id_string};

/// Default maximum number of notifications kept per session.
pub const DEFAULT_CAPACITY: usize = 500;

/// Maximum characters of chat content shown in a message notification.
const MESSAGE_PREVIEW_CHARS: usize = 120;

// =============================================================================
// Notification
// =============================================================================

/// Visual category of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationCategory {
    /// Neutral information.
    #[default]
    Info,
    /// Something completed successfully.
    Success,
    /// Needs attention.
    Warning,
    /// Something failed.
    Error,
}

impl NotificationCategory {
    /// Parse a category, falling back to `Info` for unknown values.
    #[must_use]
    pub fn from_str_lenient(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "success" => Self::Success,
            "warning" | "warn" => Self::Warning,
            "error" => Self::Error,
            _ => Self::Info,
        }
    }

    /// Get the category name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

/// A single notification shown in the user's bell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    /// Unique identifier.
    pub id: String,
    /// Short headline.
    pub title: String,
    /// Body text.
    pub message: String,
    /// Visual category.
    pub category: NotificationCategory,
    /// When the notification was created.
    pub created_at: DateTime<Utc>,
    /// Whether the user has seen it. Only ever flips false → true.
    pub read: bool,
}

impl Notification {
    /// Materialize a locally created notification with a fresh id.
    #[must_use]
    pub fn from_input(input: NotificationInput) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: input.title,
            message: input.message,
            category: input.category,
            created_at: Utc::now(),
            read: false,
        }
    }

    /// Decode a row of the notifications table.
    ///
    /// # Errors
    ///
    /// Returns an error if the row has no usable id or a field has the wrong type.
    pub fn from_record(record: Record) -> Result<Self, serde_json::Error> {
        let row: NotificationRow = serde_json::from_value(record)?;
        Ok(Self {
            id: row.id,
            title: row.title.unwrap_or_default(),
            message: row.message.unwrap_or_default(),
            category: row
                .category
                .as_deref()
                .map(NotificationCategory::from_str_lenient)
                .unwrap_or_default(),
            created_at: row.created_at.unwrap_or_else(Utc::now),
            read: row.read.unwrap_or(false),
        })
    }

    /// Build the notification announcing a chat message.
    #[must_use]
    pub fn from_chat_message(message: &ChatMessage) -> Self {
        let preview: String = message
            .content
            .as_deref()
            .unwrap_or_default()
            .chars()
            .take(MESSAGE_PREVIEW_CHARS)
            .collect();

        Self {
            id: format!("message:{}", message.id),
            title: "New message".to_string(),
            message: preview,
            category: NotificationCategory::Info,
            created_at: message.created_at.unwrap_or_else(Utc::now),
            read: false,
        }
    }
}

/// Caller-supplied fields for a new notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationInput {
    /// Short headline.
    pub title: String,
    /// Body text.
    pub message: String,
    /// Visual category.
    pub category: NotificationCategory,
}

impl NotificationInput {
    /// Create a new input.
    #[must_use]
    pub fn new(
        title: impl Into<String>,
        message: impl Into<String>,
        category: NotificationCategory,
    ) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            category,
        }
    }
}

#[derive(Debug, Deserialize)]
struct NotificationRow {
    #[serde(deserialize_with = "id_string")]
    id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default, alias = "type")]
    category: Option<String>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    read: Option<bool>,
}

// =============================================================================
// Chat Messages
// =============================================================================

/// A row of the chat messages table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChatMessage {
    /// Message id.
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    /// Chat session the message belongs to.
    #[serde(deserialize_with = "id_string")]
    pub session_id: String,
    /// Author of the message.
    #[serde(deserialize_with = "id_string")]
    pub sender_id: String,
    /// Message text.
    #[serde(default)]
    pub content: Option<String>,
    /// When the message was sent.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl ChatMessage {
    /// Decode a row of the messages table.
    ///
    /// # Errors
    ///
    /// Returns an error if an id field is missing or malformed.
    pub fn from_record(record: Record) -> Result<Self, serde_json::Error> {
        serde_json::from_value(record)
    }
}

/// Extract the participant user id from a chat participants row.
#[must_use]
pub fn participant_id(record: &Record) -> Option<String> {
    record.get("user_id").and_then(super::record::value_to_id)
}

// =============================================================================
// Notification Feed
// =============================================================================

/// Ordered, de-duplicated, bounded notification list with an unread counter.
#[derive(Debug, Clone)]
pub struct NotificationFeed {
    entries: VecDeque<Notification>,
    ids: HashSet<String>,
    unread: usize,
    capacity: usize,
}

impl Default for NotificationFeed {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl NotificationFeed {
    /// Create an empty feed holding at most `capacity` entries (minimum 1).
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            ids: HashSet::new(),
            unread: 0,
            capacity: capacity.max(1),
        }
    }

    /// Prepend a notification.
    ///
    /// Returns `false` (and changes nothing) if the id is already present, or
    /// if the entry is read and the full list holds only unread entries, in
    /// which case it would be the one evicted.
    pub fn push(&mut self, notification: Notification) -> bool {
        if self.ids.contains(&notification.id) {
            return false;
        }
        if notification.read
            && self.entries.len() >= self.capacity
            && self.unread == self.entries.len()
        {
            return false;
        }

        if !notification.read {
            self.unread += 1;
        }
        self.ids.insert(notification.id.clone());
        self.entries.push_front(notification);
        self.enforce_capacity();
        true
    }

    /// Replace the whole list with a most-recent-first snapshot.
    ///
    /// Duplicate ids inside the snapshot keep their first occurrence.
    /// Returns the number of entries kept.
    pub fn replace(&mut self, snapshot: impl IntoIterator<Item = Notification>) -> usize {
        self.entries.clear();
        self.ids.clear();
        self.unread = 0;

        for notification in snapshot {
            if !self.ids.insert(notification.id.clone()) {
                continue;
            }
            if !notification.read {
                self.unread += 1;
            }
            self.entries.push_back(notification);
        }

        self.enforce_capacity();
        self.entries.len()
    }

    /// Mark one notification as read.
    ///
    /// Returns `true` only when an unread entry was flipped.
    pub fn mark_read(&mut self, id: &str) -> bool {
        match self.entries.iter_mut().find(|n| n.id == id) {
            Some(notification) if !notification.read => {
                notification.read = true;
                self.unread = self.unread.saturating_sub(1);
                true
            }
            _ => false,
        }
    }

    /// Mark every notification as read. Returns how many were flipped.
    pub fn mark_all_read(&mut self) -> usize {
        let mut flipped = 0;
        for notification in &mut self.entries {
            if !notification.read {
                notification.read = true;
                flipped += 1;
            }
        }
        self.unread = 0;
        flipped
    }

    /// Number of unread notifications.
    #[must_use]
    pub const fn unread_count(&self) -> usize {
        self.unread
    }

    /// Number of notifications.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the feed is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of entries kept.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether a notification with this id is present.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Look up a notification by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Notification> {
        self.entries.iter().find(|n| n.id == id)
    }

    /// Iterate most-recent-first.
    pub fn iter(&self) -> impl Iterator<Item = &Notification> {
        self.entries.iter()
    }

    /// Copy the entries out, most-recent-first.
    #[must_use]
    pub fn to_vec(&self) -> Vec<Notification> {
        self.entries.iter().cloned().collect()
    }

    fn enforce_capacity(&mut self) {
        while self.entries.len() > self.capacity {
            let victim = self
                .entries
                .iter()
                .rposition(|n| n.read)
                .unwrap_or(self.entries.len() - 1);

            if let Some(evicted) = self.entries.remove(victim) {
                self.ids.remove(&evicted.id);
                if !evicted.read {
                    self.unread = self.unread.saturating_sub(1);
                }
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
