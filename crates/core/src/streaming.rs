//! Stream Event Types
//!
//! Every streaming endpoint the system talks to (analysis, bulk tree fetch,
//! keyword search) frames its body the same way: records separated by a
//! blank line, each carrying a `data:` payload that is either a JSON object
//! tagged by `type` or the `[DONE]` sentinel. Payloads are decoded once,
//! here, into the closed `StreamEvent` union so downstream code matches
//! exhaustively instead of probing fields.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::search::SearchResultItem;
use crate::tree::NavigationNode;

/// Payload that marks the end of a stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// A decoded stream record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Intermediate model reasoning, incremental
    Reasoning {
        #[serde(deserialize_with = "string_or_json")]
        content: String,
    },

    /// Final-answer text, incremental
    Content {
        #[serde(deserialize_with = "string_or_json")]
        content: String,
    },

    /// A payload that was not a recognized record; treated as answer text
    Text { content: String },

    /// Bulk tree fetch: nodes fetched since the previous progress record
    Progress {
        #[serde(default)]
        count: u64,
    },

    /// Bulk tree fetch: the complete forest
    Result {
        #[serde(default)]
        data: Vec<NavigationNode>,
    },

    /// Search: paging information for the session
    Initial {
        #[serde(default)]
        has_more: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        page_token: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        total_unique_spaces: Option<u64>,
    },

    /// Search: one result item
    Detail {
        item: SearchResultItem,
        #[serde(default)]
        fetched_count: u64,
    },

    /// Search: the server finished sending items
    Complete {
        #[serde(default)]
        fetched_count: u64,
    },

    /// A failure reported by the service or the transport
    Error {
        #[serde(default)]
        message: String,
        /// Suggested delay in seconds before retrying
        #[serde(default, skip_serializing_if = "Option::is_none")]
        retry_after: Option<u64>,
    },

    /// End of stream
    Done,
}

impl StreamEvent {
    pub fn text(content: impl Into<String>) -> Self {
        Self::Text {
            content: content.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            retry_after: None,
        }
    }

    /// Answer text carried by `content` and `text` events.
    pub fn answer_text(&self) -> Option<&str> {
        match self {
            Self::Content { content } | Self::Text { content } => Some(content),
            _ => None,
        }
    }

    /// Whether no further events follow this one.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error { .. })
    }
}

/// Decode one record payload.
///
/// Returns `None` for an empty payload. A payload that is not a recognized
/// record never fails: a JSON object with an `error` field becomes
/// [`StreamEvent::Error`], anything else becomes [`StreamEvent::Text`] with
/// the raw payload.
pub fn decode_payload(payload: &str) -> Option<StreamEvent> {
    let payload = payload.trim();
    if payload.is_empty() {
        return None;
    }
    if payload == DONE_SENTINEL {
        return Some(StreamEvent::Done);
    }

    match serde_json::from_str::<StreamEvent>(payload) {
        Ok(event) => Some(event),
        Err(_) => Some(error_field(payload).unwrap_or_else(|| StreamEvent::text(payload))),
    }
}

fn error_field(payload: &str) -> Option<StreamEvent> {
    let value: Value = serde_json::from_str(payload).ok()?;
    let error = value.get("error")?;
    let message = match error {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    Some(StreamEvent::Error {
        message,
        retry_after: value.get("retry_after").and_then(Value::as_u64),
    })
}

fn string_or_json<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}
