//! Protocol module for the booking chat channel
//!
//! Defines the wire envelopes exchanged with the chat endpoint.
//! The protocol uses JSON text frames over WebSocket.

mod messages;

pub use messages::*;
