//! Realtime Channel Codec
//!
//! Encoding and decoding of the phoenix-channel frames spoken by the
//! backend's realtime websocket.
//!
//! # Frame Format
//!
//! Every frame is a JSON object:
//! ```json
//! {"topic":"realtime:public:notifications","event":"phx_join","payload":{...},"ref":"1"}
//! ```
//!
//! Inserted rows arrive either as a `postgres_changes` event carrying
//! `payload.data.record`, or (older servers) as an `INSERT` event carrying
//! `payload.record`.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::application::ports::{Filter, Record, Topic};

/// Topic used for socket-level heartbeats.
const PHOENIX_TOPIC: &str = "phoenix";

/// Database schema the tables live in.
const SCHEMA: &str = "public";

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid message format.
    #[error("invalid message format: {0}")]
    InvalidFormat(String),
}

/// One phoenix-channel frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeFrame {
    /// Channel topic.
    pub topic: String,
    /// Event name.
    pub event: String,
    /// Event payload.
    #[serde(default)]
    pub payload: Value,
    /// Client reference echoed in replies.
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
}

impl RealtimeFrame {
    /// Join request for inserts into `topic`, optionally filtered.
    #[must_use]
    pub fn join(topic: Topic, filter: Option<&Filter>, access_token: &str, reference: u64) -> Self {
        let mut change = json!({
            "event": "INSERT",
            "schema": SCHEMA,
            "table": topic.table(),
        });
        if let Some(filter) = filter {
            change["filter"] = Value::String(filter_expression(filter));
        }

        Self {
            topic: channel_topic(topic, filter),
            event: "phx_join".to_string(),
            payload: json!({
                "config": {
                    "broadcast": {"self": false},
                    "presence": {"key": ""},
                    "postgres_changes": [change],
                },
                "access_token": access_token,
            }),
            reference: Some(reference.to_string()),
        }
    }

    /// Socket heartbeat.
    #[must_use]
    pub fn heartbeat(reference: u64) -> Self {
        Self {
            topic: PHOENIX_TOPIC.to_string(),
            event: "heartbeat".to_string(),
            payload: json!({}),
            reference: Some(reference.to_string()),
        }
    }

    /// Leave request for a joined channel.
    #[must_use]
    pub fn leave(channel: &str, reference: u64) -> Self {
        Self {
            topic: channel.to_string(),
            event: "phx_leave".to_string(),
            payload: json!({}),
            reference: Some(reference.to_string()),
        }
    }

    /// Serialize to JSON text.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self) -> Result<String, CodecError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a JSON object with topic and event.
    pub fn decode(text: &str) -> Result<Self, CodecError> {
        let trimmed = text.trim();
        if !trimmed.starts_with('{') {
            return Err(CodecError::InvalidFormat(format!(
                "expected JSON object, got: {}...",
                trimmed.chars().take(50).collect::<String>()
            )));
        }
        Ok(serde_json::from_str(trimmed)?)
    }

    /// The inserted row, if this frame announces one.
    #[must_use]
    pub fn inserted_record(&self) -> Option<Record> {
        match self.event.as_str() {
            "postgres_changes" => {
                let data = self.payload.get("data")?;
                let kind = data.get("type").or_else(|| data.get("eventType"));
                if kind.and_then(Value::as_str) != Some("INSERT") {
                    return None;
                }
                data.get("record").cloned()
            }
            "INSERT" => self.payload.get("record").cloned(),
            _ => None,
        }
    }

    /// Whether this is the reply to the request with `reference`.
    #[must_use]
    pub fn is_reply_to(&self, reference: u64) -> bool {
        self.event == "phx_reply" && self.reference.as_deref() == Some(reference.to_string().as_str())
    }

    /// Error reason carried by a reply or channel error frame.
    #[must_use]
    pub fn error_reason(&self) -> Option<String> {
        match self.event.as_str() {
            "phx_error" => Some("channel error".to_string()),
            "phx_reply" => {
                let status = self.payload.get("status").and_then(Value::as_str)?;
                if status == "ok" {
                    return None;
                }
                let reason = self
                    .payload
                    .pointer("/response/reason")
                    .and_then(Value::as_str)
                    .unwrap_or(status);
                Some(reason.to_string())
            }
            _ => None,
        }
    }
}

/// Channel topic for a table and filter.
#[must_use]
pub fn channel_topic(topic: Topic, filter: Option<&Filter>) -> String {
    filter.map_or_else(
        || format!("realtime:{SCHEMA}:{}", topic.table()),
        |filter| format!("realtime:{SCHEMA}:{}:{}", topic.table(), filter_expression(filter)),
    )
}

/// Row filter in the backend's `column=eq.value` syntax.
#[must_use]
pub fn filter_expression(filter: &Filter) -> String {
    format!("{}=eq.{}", filter.column, filter.value)
}
