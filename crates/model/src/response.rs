use std::future::poll_fn;
use std::pin::Pin;
use std::task::{self, Poll};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::provider::ModelProviderError;

/// One assistant message, streamed by the model provider as a sequence of
/// [`ModelResponseEvent`]s.
///
/// A well-behaved response delivers its events in this order: message
/// deltas first, then complete tool calls, and a single
/// [`ModelResponseEvent::Completed`] at last. Tool calls are only emitted
/// once their arguments have been fully received.
pub trait ModelResponse: Sized + Send + 'static {
    /// The error type that may be returned by the provider.
    type Error: ModelProviderError;

    /// Attempts to pull out the next event from the response.
    ///
    /// Returns `Poll::Ready(Ok(None))` once the response is exhausted, and
    /// keeps doing so if polled again. An error ends the response; the
    /// events delivered before it must be treated as incomplete.
    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>>;
}

type EventResult<E> = Result<Option<ModelResponseEvent>, E>;

/// An extension trait for [`ModelResponse`]s that provides async helpers.
pub trait ModelResponseExt: ModelResponse {
    /// Waits for the next event of the response.
    ///
    /// See [`ModelResponse::poll_next_event`].
    fn next_event(
        self: Pin<&mut Self>,
    ) -> impl Future<Output = EventResult<Self::Error>> + Send {
        let mut this = self;
        poll_fn(move |cx| this.as_mut().poll_next_event(cx))
    }
}

impl<R: ModelResponse> ModelResponseExt for R {}

/// The reason why a model response has finished.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelFinishReason {
    /// The model wants the requested tools to be called.
    ToolCalls,
    /// The model has finished its answer.
    Stop,
    /// The output was cut off by the provider's token limit.
    Length,
}

impl ModelFinishReason {
    /// Returns whether the message was cut off before the model finished.
    #[inline]
    pub fn is_truncated(self) -> bool {
        self == ModelFinishReason::Length
    }
}

/// Describes a tool call request from the model.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// The correlation id, echoed back by the matching tool result.
    pub id: String,
    /// The name of the tool to call.
    pub name: String,
    /// Arguments to pass to the tool, usually a JSON object.
    pub arguments: Value,
}

/// The event from a model response.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelResponseEvent {
    /// The response has been completed.
    Completed(ModelFinishReason),
    /// A piece of the assistant message text.
    MessageDelta(String),
    /// A tool call with its complete arguments.
    ToolCall(ToolCallRequest),
}
