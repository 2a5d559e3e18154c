use std::pin::Pin;
use std::task::{Context, Poll, ready};

use futures_util::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::controller::{ControllerEvent, TurnOutcome};
use crate::error::TurnError;

/// The events of a turn running in the background.
///
/// The stream ends right after the terminal event. Dropping it before that
/// cancels the turn.
#[must_use = "dropping the stream cancels the turn"]
pub struct TurnStream {
    events: mpsc::UnboundedReceiver<ControllerEvent>,
    cancel: CancellationToken,
    _guard: DropGuard,
    finished: bool,
}

impl TurnStream {
    pub(super) fn new(
        events: mpsc::UnboundedReceiver<ControllerEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            events,
            _guard: cancel.clone().drop_guard(),
            cancel,
            finished: false,
        }
    }

    /// Cancels the turn. The stream still yields the `Failed` event.
    #[inline]
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Skips the remaining events and returns how the turn stopped.
    pub async fn into_outcome(mut self) -> Result<TurnOutcome, TurnError> {
        while let Some(event) = self.events.recv().await {
            match event {
                ControllerEvent::Done { answer } => {
                    return Ok(TurnOutcome::Done { answer });
                }
                ControllerEvent::AwaitingExternal { pending } => {
                    return Ok(TurnOutcome::AwaitExternal { pending });
                }
                ControllerEvent::Failed(err) => return Err(err),
                _ => {}
            }
        }
        // The turn task went away without a terminal event.
        Err(TurnError::Cancelled)
    }
}

impl Stream for TurnStream {
    type Item = ControllerEvent;

    fn poll_next(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }
        let event = ready!(this.events.poll_recv(cx));
        match &event {
            Some(event) if !event.is_terminal() => {}
            _ => this.finished = true,
        }
        Poll::Ready(event)
    }
}

impl std::fmt::Debug for TurnStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnStream")
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}
