//! Reconnect delay policy
//!
//! The delay between a close and the next connect attempt is a policy,
//! not part of the protocol. The default is the flat three seconds the web
//! widget always used; capped exponential backoff with jitter is available
//! for deployments that see many clients reconnecting at once.

use std::fmt;
use std::time::Duration;

use backoff::backoff::{Backoff, Constant};
use backoff::ExponentialBackoffBuilder;

/// Delay used by the fixed policy unless configured otherwise
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// How long to wait before reconnecting
#[derive(Debug, Clone, PartialEq)]
pub enum ReconnectPolicy {
    /// Same delay before every attempt
    Fixed { delay: Duration },

    /// Delay grows by `multiplier` up to `max`, randomized by
    /// `±randomization_factor`
    Exponential {
        initial: Duration,
        max: Duration,
        multiplier: f64,
        randomization_factor: f64,
    },
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy::Fixed {
            delay: DEFAULT_RECONNECT_DELAY,
        }
    }
}

impl ReconnectPolicy {
    /// Create the stateful delay generator for one channel
    pub fn build(&self) -> ReconnectBackoff {
        match *self {
            ReconnectPolicy::Fixed { delay } => ReconnectBackoff {
                inner: Box::new(Constant::new(delay)),
                fallback: delay,
            },
            ReconnectPolicy::Exponential {
                initial,
                max,
                multiplier,
                randomization_factor,
            } => {
                let backoff = ExponentialBackoffBuilder::new()
                    .with_initial_interval(initial)
                    .with_max_interval(max)
                    .with_multiplier(multiplier)
                    .with_randomization_factor(randomization_factor)
                    // Retry forever
                    .with_max_elapsed_time(None)
                    .build();
                ReconnectBackoff {
                    inner: Box::new(backoff),
                    fallback: max,
                }
            }
        }
    }
}

/// Stateful reconnect delay generator
pub struct ReconnectBackoff {
    inner: Box<dyn Backoff + Send>,
    fallback: Duration,
}

impl ReconnectBackoff {
    /// Wrap any `backoff` implementation
    pub fn from_backoff(backoff: impl Backoff + Send + 'static, fallback: Duration) -> Self {
        Self {
            inner: Box::new(backoff),
            fallback,
        }
    }

    /// Delay before the next attempt
    pub fn next_delay(&mut self) -> Duration {
        self.inner.next_backoff().unwrap_or(self.fallback)
    }

    /// Start over after a successful connection
    pub fn reset(&mut self) {
        self.inner.reset();
    }
}

impl fmt::Debug for ReconnectBackoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconnectBackoff")
            .field("fallback", &self.fallback)
            .finish_non_exhaustive()
    }
}
