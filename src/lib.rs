//! Booking Chat
//!
//! Real-time chat for one booking conversation between two users:
//! a resilient WebSocket channel that reconnects on its own, gates sends on
//! connection state, and attributes every incoming message to "me" or
//! "the other side".

pub mod channel;
pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod render;
pub mod version;

pub use error::{Error, Result};
