//! Caller-side retry policy for turns that failed on the model.

use std::time::Duration;

use backoff::ExponentialBackoff;
use backoff::backoff::Backoff as _;
use turnstile_core::{ControllerEvent, TurnError};

const MAX_ELAPSED_TIME: Duration = Duration::from_secs(60);

/// Decides when a failed turn is retried.
///
/// Each run of failures gets its own backoff window: the window starts over
/// whenever a turn stops normally.
pub struct RetryPolicy {
    backoff: ExponentialBackoff,
}

impl RetryPolicy {
    /// Creates a policy with the default exponential backoff.
    #[inline]
    pub fn new() -> Self {
        Self::with_backoff(ExponentialBackoff {
            max_elapsed_time: Some(MAX_ELAPSED_TIME),
            ..Default::default()
        })
    }

    /// Creates a policy with a custom backoff.
    #[inline]
    pub fn with_backoff(backoff: ExponentialBackoff) -> Self {
        Self { backoff }
    }

    /// Feeds a terminal event of a turn.
    ///
    /// Returns how long to wait before retrying, or `None` if the turn
    /// should not be retried.
    pub fn on_event(&mut self, event: &ControllerEvent) -> Option<Duration> {
        match event {
            ControllerEvent::Failed(err) => self.next_delay(err),
            ControllerEvent::Done { .. }
            | ControllerEvent::AwaitingExternal { .. } => {
                self.backoff.reset();
                None
            }
            _ => None,
        }
    }

    fn next_delay(&mut self, err: &TurnError) -> Option<Duration> {
        match err {
            TurnError::ModelUnavailable { kind, .. } if kind.is_transient() => {
                let delay = self.backoff.next_backoff();
                if delay.is_none() {
                    debug!("giving up retrying: {err}");
                }
                delay
            }
            _ => None,
        }
    }
}

impl Default for RetryPolicy {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}
