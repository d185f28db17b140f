//! Booking chat channel
//!
//! Maintains one resilient WebSocket channel per booking conversation:
//! - Explicit connection state machine with generation fencing
//! - Reconnection with a fixed or exponential delay policy
//! - Send gating and sender attribution
//! - Tokio driver backed by tokio-tungstenite

mod client;
mod manager;
mod reconnect;
mod session;
mod state;
mod transport;

pub use client::*;
pub use manager::*;
pub use reconnect::*;
pub use session::*;
pub use state::*;
pub use transport::*;
