//! Chat envelope definitions
//!
//! The wire unit is asymmetric: the client sends `{message, receiver_id}`
//! and the server broadcasts `{sender, message, timestamp}` to every
//! participant of the booking, including the original sender.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ─────────────────────────────────────────────────────────────────
// Client → Server
// ─────────────────────────────────────────────────────────────────

/// Message typed by the local user, addressed to the counterpart
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundEnvelope {
    /// Message text, trimmed and never empty
    pub message: String,

    /// Identity of the counterpart
    pub receiver_id: String,
}

impl OutboundEnvelope {
    /// Build an envelope from raw user input
    ///
    /// The text is trimmed. Fails with `InvalidInput` when nothing is left
    /// or when no receiver is known yet.
    pub fn new(raw_text: &str, receiver_id: Option<&str>) -> Result<Self> {
        let message = raw_text.trim();
        if message.is_empty() {
            return Err(Error::invalid_input("message is empty"));
        }

        let receiver_id = match receiver_id {
            Some(id) if !id.trim().is_empty() => id.to_string(),
            _ => return Err(Error::invalid_input("receiver id is missing")),
        };

        Ok(Self {
            message: message.to_string(),
            receiver_id,
        })
    }

    /// Serialize to a JSON text frame
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::Internal(format!("encode envelope: {}", e)))
    }
}

// ─────────────────────────────────────────────────────────────────
// Server → Client
// ─────────────────────────────────────────────────────────────────

/// Message broadcast by the chat endpoint
///
/// Unknown fields are ignored so the server can add metadata without
/// breaking older clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundEnvelope {
    /// Identity of the author
    pub sender: String,

    /// Message text
    pub message: String,

    /// Server-formatted timestamp, displayed verbatim
    pub timestamp: String,

    /// Identity of the addressee, when the server includes it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver: Option<String>,
}

impl InboundEnvelope {
    /// Deserialize from a JSON text frame
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::protocol(e.to_string(), json))
    }

    /// Deserialize from a binary frame carrying UTF-8 JSON
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes).map_err(|e| {
            Error::protocol(
                format!("binary frame is not UTF-8: {}", e),
                &String::from_utf8_lossy(bytes),
            )
        })?;
        Self::from_json(text)
    }

    /// Whether the local user wrote this message
    pub fn is_from(&self, user_id: &str) -> bool {
        self.sender == user_id
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
