//! Connection state and identifiers

use std::fmt;
use std::time::Duration;

/// Connection attempt counter
///
/// Incremented on every (re)connect. Events carry the generation of the
/// transport that produced them; anything from an older generation is
/// ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Generation(pub u64);

impl Generation {
    pub fn next(self) -> Self {
        Generation(self.0 + 1)
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle of a timer scheduled by the channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(pub u64);

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer-{}", self.0)
    }
}

/// Lifecycle of the channel
///
/// `Idle → Connecting → Open → Closed → Reconnecting → Connecting → …`,
/// with `ClosedFinal` reached only by teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Never connected
    #[default]
    Idle,
    /// Transport opened, waiting for it to report open
    Connecting,
    /// Sends go straight to the transport
    Open,
    /// Transport closed; a reconnect is about to be scheduled
    Closed,
    /// Waiting for the reconnect timer
    Reconnecting { delay: Duration },
    /// Torn down; nothing happens any more
    ClosedFinal,
}

impl ConnectionState {
    /// Whether a transport is live or being opened
    pub fn is_active(&self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Open)
    }

    pub fn is_open(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }

    pub fn is_final(&self) -> bool {
        matches!(self, ConnectionState::ClosedFinal)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Idle => write!(f, "IDLE"),
            ConnectionState::Connecting => write!(f, "CONNECTING"),
            ConnectionState::Open => write!(f, "OPEN"),
            ConnectionState::Closed => write!(f, "CLOSED"),
            ConnectionState::Reconnecting { delay } => {
                write!(f, "RECONNECTING({}ms)", delay.as_millis())
            }
            ConnectionState::ClosedFinal => write!(f, "CLOSED_FINAL"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state() {
        assert_eq!(ConnectionState::default(), ConnectionState::Idle);
    }

    #[test]
    fn test_generation_is_monotonic() {
        let g = Generation::default();
        assert!(g.next() > g);
        assert_eq!(g.next().next(), Generation(2));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Open.to_string(), "OPEN");
        assert_eq!(
            ConnectionState::Reconnecting { delay: Duration::from_secs(3) }.to_string(),
            "RECONNECTING(3000ms)"
        );
        assert_eq!(ConnectionState::ClosedFinal.to_string(), "CLOSED_FINAL");
    }

    #[test]
    fn test_state_predicates() {
        assert!(ConnectionState::Connecting.is_active());
        assert!(ConnectionState::Open.is_active());
        assert!(!ConnectionState::Closed.is_active());
        assert!(!ConnectionState::Reconnecting { delay: Duration::ZERO }.is_active());
        assert!(ConnectionState::ClosedFinal.is_final());
    }
}
