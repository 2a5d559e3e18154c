use std::collections::HashSet;
use std::pin::{Pin, pin};
use std::sync::Arc;

use tracing::Instrument;
use turnstile_model::{
    ErrorKind, ModelFinishReason, ModelMessage, ModelProvider,
    ModelProviderError, ModelRequest, ModelResponseEvent, ModelResponseExt,
    ToolCallRequest,
};

use crate::conversation::Conversation;
use crate::error::TurnError;
use crate::tool::CapabilitySet;

type SendRequestResult =
    Result<AssistantResponse, Box<dyn ModelProviderError>>;
type BoxedSendRequestFuture =
    Pin<Box<dyn Future<Output = SendRequestResult> + Send>>;
#[rustfmt::skip]
type HandlerFn = Arc<
    dyn Fn(ModelRequest, Box<dyn Fn(String) + Send + 'static>)
        -> BoxedSendRequestFuture + Send + Sync
>;

/// A wrapper around a model provider that maintains an execution
/// environment for the provider and provides a type-erased interface
/// for the other modules.
#[derive(Clone)]
pub(crate) struct ModelClient {
    handler_fn: HandlerFn,
}

impl ModelClient {
    #[inline]
    pub fn new<P: ModelProvider + 'static>(provider: P) -> Self {
        let handler_fn: HandlerFn = Arc::new(move |req, on_delta| {
            let fut = provider.send_request(&req);
            Box::pin(
                async move {
                    trace!("got a request: {:?}", req);
                    let resp_or_err = fut.await;
                    handle_response::<P>(resp_or_err, on_delta).await
                }
                .instrument(trace_span!("model client req")),
            )
        });
        Self { handler_fn }
    }

    /// Sends the conversation with every capability advertised, and
    /// returns the validated response.
    ///
    /// # Cancel safety
    ///
    /// This method is cancel safe. The response stops streaming further
    /// events when this operation is cancelled.
    pub async fn invoke(
        &self,
        system_prompt: &str,
        conversation: &Conversation,
        capabilities: &CapabilitySet,
        on_delta: impl Fn(String) + Send + 'static,
    ) -> Result<AssistantResponse, TurnError> {
        let mut messages = Vec::with_capacity(conversation.len() + 1);
        messages.push(ModelMessage::System {
            content: system_prompt.to_owned(),
        });
        messages.extend(conversation.to_model_messages());
        let req = ModelRequest {
            messages,
            tools: capabilities.definitions(),
        };

        let resp = (self.handler_fn)(req, Box::new(on_delta))
            .await
            .map_err(|err| map_provider_error(err.as_ref()))?;
        resp.validate(conversation)?;
        Ok(resp)
    }
}

/// A completely received response from the model client.
#[derive(Clone, Debug, Default)]
pub(crate) struct AssistantResponse {
    pub content: String,
    /// Tool calls requested by the model.
    pub tool_calls: Vec<ToolCallRequest>,
    /// The reason the model finished generating.
    pub finish_reason: Option<ModelFinishReason>,
}

impl AssistantResponse {
    fn validate(&self, conversation: &Conversation) -> Result<(), TurnError> {
        let Some(finish_reason) = self.finish_reason else {
            return Err(TurnError::MalformedResponse(
                "response ended without a finish reason".to_owned(),
            ));
        };
        let mut ids = HashSet::with_capacity(self.tool_calls.len());
        for req in &self.tool_calls {
            if req.id.is_empty() || req.name.is_empty() {
                return Err(TurnError::MalformedResponse(format!(
                    "tool call without id or name: {req:?}"
                )));
            }
            let reused = conversation.has_tool_call(&req.id);
            if !ids.insert(req.id.as_str()) || reused {
                return Err(TurnError::MalformedResponse(format!(
                    "duplicated tool call id: {}",
                    req.id
                )));
            }
        }
        if self.tool_calls.is_empty()
            && finish_reason == ModelFinishReason::ToolCalls
        {
            warn!("model finished for tool calls, but requested none");
        }
        if finish_reason.is_truncated() {
            warn!("model output was truncated by the token limit");
        }
        Ok(())
    }
}

fn map_provider_error(err: &dyn ModelProviderError) -> TurnError {
    match err.kind() {
        ErrorKind::Malformed => TurnError::MalformedResponse(err.to_string()),
        kind => TurnError::ModelUnavailable {
            kind,
            message: err.to_string(),
        },
    }
}

async fn handle_response<P: ModelProvider + 'static>(
    resp_or_err: Result<P::Response, P::Error>,
    on_delta: Box<dyn Fn(String) + Send + 'static>,
) -> SendRequestResult {
    let resp = match resp_or_err {
        Ok(resp) => resp,
        Err(err) => {
            error!("got an error: {err:?}");
            return Err(Box::new(err));
        }
    };

    let mut content = String::new();
    let mut tool_calls = Vec::new();
    let mut finish_reason = None;

    trace!("start receiving events");

    let mut pinned_resp = pin!(resp);
    loop {
        let event = match pinned_resp.as_mut().next_event().await {
            Ok(event) => event,
            Err(err) => {
                error!("got an error: {err:?}");
                return Err(Box::new(err));
            }
        };

        let Some(event) = event else {
            break;
        };
        trace!("got an event: {event:?}");

        match event {
            ModelResponseEvent::MessageDelta(delta) => {
                content.push_str(&delta);
                on_delta(delta);
            }
            ModelResponseEvent::ToolCall(req) => {
                tool_calls.push(req);
            }
            ModelResponseEvent::Completed(reason) => {
                finish_reason = Some(reason);
            }
        }
    }

    trace!("finished a request");

    Ok(AssistantResponse {
        content,
        tool_calls,
        finish_reason,
    })
}
