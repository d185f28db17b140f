//! Seams between the channel state machine and the outside world
//!
//! The manager never touches a socket or a clock directly. It opens
//! transports through a [`Connector`], arms timers through a [`Scheduler`],
//! and is fed everything that happens as [`ChannelEvent`]s.

use std::time::Duration;

use url::Url;

use crate::error::Result;

use super::state::{Generation, TimerId};

/// One bidirectional, message-framed connection
pub trait Transport {
    /// Write one text frame
    fn send_text(&mut self, frame: String) -> Result<()>;

    /// Ask the transport to close
    ///
    /// The transport reports `Closed` for its generation once it is down.
    fn close(&mut self);
}

/// Opens transports
pub trait Connector {
    type Transport: Transport;

    /// Start opening a transport to `url`
    ///
    /// Every event the transport produces must be tagged with `generation`.
    fn open(&mut self, url: &Url, generation: Generation) -> Result<Self::Transport>;
}

/// Arms and disarms one-shot timers
pub trait Scheduler {
    /// Deliver `ChannelEvent::TimerFired(id)` after `delay`
    fn schedule(&mut self, id: TimerId, delay: Duration);

    /// Best-effort cancel; a timer that already fired is ignored by id
    fn cancel(&mut self, id: TimerId);
}

/// Something a transport reported
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Connection established
    Opened,
    /// Text frame received
    Text(String),
    /// Binary frame received
    Binary(Vec<u8>),
    /// Connection is gone; reported exactly once per transport
    Closed { reason: String },
    /// Socket-level failure
    Error { message: String },
}

impl TransportEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            TransportEvent::Opened => "open",
            TransportEvent::Text(_) => "text",
            TransportEvent::Binary(_) => "binary",
            TransportEvent::Closed { .. } => "close",
            TransportEvent::Error { .. } => "error",
        }
    }
}

/// Input to the channel state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Event from the transport opened for `generation`
    Transport {
        generation: Generation,
        event: TransportEvent,
    },
    /// A scheduled timer expired
    TimerFired(TimerId),
}

impl ChannelEvent {
    pub fn transport(generation: Generation, event: TransportEvent) -> Self {
        ChannelEvent::Transport { generation, event }
    }
}
