//! Session context and channel endpoint
//!
//! Both are read once when the chat is initialized and never change while
//! the channel is alive.

use url::Url;

use crate::error::{Error, Result};

/// Who is chatting, and about which booking
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    /// Booking the conversation belongs to; names the chat topic
    pub booking_id: String,

    /// Local user, used to tell sent from received messages
    pub current_user_id: String,

    /// Counterpart; sends are rejected while unknown
    pub receiver_id: Option<String>,
}

impl SessionContext {
    pub fn new(
        booking_id: impl Into<String>,
        current_user_id: impl Into<String>,
        receiver_id: Option<String>,
    ) -> Self {
        Self {
            booking_id: booking_id.into(),
            current_user_id: current_user_id.into(),
            receiver_id: receiver_id.filter(|id| !id.trim().is_empty()),
        }
    }
}

/// Where the chat server lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelEndpoint {
    /// `host[:port]` of the page hosting the chat
    pub host: String,

    /// Whether the hosting page is served over TLS
    pub secure: bool,
}

impl ChannelEndpoint {
    pub fn new(host: impl Into<String>, secure: bool) -> Self {
        Self {
            host: host.into(),
            secure,
        }
    }

    pub fn scheme(&self) -> &'static str {
        if self.secure {
            "wss"
        } else {
            "ws"
        }
    }

    /// Build `{ws|wss}://{host}/ws/chat/{booking_id}/`
    ///
    /// The booking id is percent-encoded as a single path segment.
    pub fn channel_url(&self, booking_id: &str) -> Result<Url> {
        let base = format!("{}://{}/", self.scheme(), self.host);
        let mut url = Url::parse(&base).map_err(|e| Error::InvalidUrl {
            url: base.clone(),
            message: e.to_string(),
        })?;

        if url.path() != "/" || url.query().is_some() || url.fragment().is_some() {
            return Err(Error::InvalidUrl {
                url: base,
                message: "host must not contain a path, query or fragment".to_string(),
            });
        }

        url.path_segments_mut()
            .map_err(|_| Error::InvalidUrl {
                url: base.clone(),
                message: "URL cannot carry a path".to_string(),
            })?
            .clear()
            .extend(["ws", "chat", booking_id, ""]);

        Ok(url)
    }
}
