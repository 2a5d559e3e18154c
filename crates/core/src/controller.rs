//! Drives one turn of a conversation: invoke the model, classify the
//! response, then either stop, run local tools and loop, or hand the turn
//! over to the host.

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use turnstile_model::ToolCallRequest;

use crate::config::{RoutingPolicy, TurnConfig};
use crate::conversation::Conversation;
use crate::error::TurnError;
use crate::model_client::{AssistantResponse, ModelClient};
use crate::tool::{CapabilitySet, executor};

/// States a turn goes through.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    /// Waiting for the model.
    Invoking,
    /// Deciding what to do with the model response.
    Classifying,
    /// Running local tools.
    DispatchLocal,
    /// Suspended until the host supplies results for external actions.
    AwaitExternal,
    /// The model produced a final answer.
    Done,
}

/// How a turn stopped without error.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TurnOutcome {
    /// The model answered without requesting tools.
    Done {
        /// Text of the final answer.
        answer: String,
    },
    /// The turn waits for the host to answer these tool calls.
    AwaitExternal {
        /// Tool calls the host must answer, in request order.
        pending: Vec<ToolCallRequest>,
    },
}

impl TurnOutcome {
    /// Returns the state the turn stopped in.
    #[inline]
    pub fn state(&self) -> TurnState {
        match self {
            TurnOutcome::Done { .. } => TurnState::Done,
            TurnOutcome::AwaitExternal { .. } => TurnState::AwaitExternal,
        }
    }

    /// Returns the final answer, if the turn is done.
    #[inline]
    pub fn answer(&self) -> Option<&str> {
        match self {
            TurnOutcome::Done { answer } => Some(answer),
            TurnOutcome::AwaitExternal { .. } => None,
        }
    }

    /// Returns the tool calls waiting for the host.
    #[inline]
    pub fn pending(&self) -> &[ToolCallRequest] {
        match self {
            TurnOutcome::Done { .. } => &[],
            TurnOutcome::AwaitExternal { pending } => pending,
        }
    }
}

/// Progress of a running turn, in the order it happens.
///
/// Every turn ends with exactly one terminal event: `Done`,
/// `AwaitingExternal` or `Failed`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ControllerEvent {
    /// The model is invoked for the `iteration`-th time in this turn.
    Invoking {
        /// Starts from 1.
        iteration: u32,
    },
    /// A piece of the assistant message, as the model streams it.
    MessageDelta(String),
    /// A local tool call has been started.
    ToolDispatched(ToolCallRequest),
    /// A tool result has been appended to the conversation.
    ToolResultAppended {
        /// Correlation id of the answered call.
        id: String,
        /// Whether the call failed.
        is_error: bool,
    },
    /// The turn is suspended.
    AwaitingExternal {
        /// Tool calls the host must answer.
        pending: Vec<ToolCallRequest>,
    },
    /// The turn is done.
    Done {
        /// Text of the final answer.
        answer: String,
    },
    /// The turn failed.
    Failed(TurnError),
}

impl ControllerEvent {
    /// Returns whether no event follows this one.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ControllerEvent::AwaitingExternal { .. }
                | ControllerEvent::Done { .. }
                | ControllerEvent::Failed(_)
        )
    }
}

impl From<&TurnOutcome> for ControllerEvent {
    fn from(outcome: &TurnOutcome) -> Self {
        match outcome {
            TurnOutcome::Done { answer } => ControllerEvent::Done {
                answer: answer.clone(),
            },
            TurnOutcome::AwaitExternal { pending } => {
                ControllerEvent::AwaitingExternal {
                    pending: pending.clone(),
                }
            }
        }
    }
}

/// Where observers of a turn receive its events, if any.
#[derive(Clone, Debug, Default)]
pub(crate) struct EventSink(Option<mpsc::UnboundedSender<ControllerEvent>>);

impl EventSink {
    #[inline]
    pub fn new(tx: mpsc::UnboundedSender<ControllerEvent>) -> Self {
        Self(Some(tx))
    }

    #[inline]
    pub fn emit(&self, event: ControllerEvent) {
        if let Some(tx) = &self.0 {
            // The observer may have gone away, which is fine.
            tx.send(event).ok();
        }
    }
}

/// Where a turn starts.
#[derive(Debug)]
pub(crate) enum Entry {
    /// Invoke the model with the conversation as it is.
    Invoke,
    /// Route tool calls left unanswered by an interrupted turn first.
    Route(Vec<ToolCallRequest>),
}

enum Route {
    Delegate,
    Dispatch,
    Partition {
        local: Vec<ToolCallRequest>,
        external: Vec<ToolCallRequest>,
    },
}

pub(crate) struct TurnController<'a> {
    pub config: &'a TurnConfig,
    pub model_client: &'a ModelClient,
    pub capabilities: &'a CapabilitySet,
    pub events: &'a EventSink,
    pub cancel: &'a CancellationToken,
}

impl TurnController<'_> {
    /// Runs the turn until it is done, suspended or failed.
    ///
    /// The conversation only grows by whole messages: a failure leaves it
    /// as it was after the last complete step.
    pub async fn run(
        &self,
        conversation: &mut Conversation,
        entry: Entry,
    ) -> Result<TurnOutcome, TurnError> {
        if let Entry::Route(tool_calls) = entry {
            debug!("routing {} interrupted tool call(s)", tool_calls.len());
            if let Some(outcome) = self.route(conversation, tool_calls).await? {
                return Ok(outcome);
            }
        }

        let mut iteration = 0;
        loop {
            if let Some(limit) = self.config.iteration_limit() {
                if iteration >= limit {
                    warn!("iteration limit of {limit} reached");
                    return Err(TurnError::IterationLimitExceeded { limit });
                }
            }
            iteration += 1;

            self.transition(TurnState::Invoking);
            self.events.emit(ControllerEvent::Invoking { iteration });
            let AssistantResponse {
                content,
                tool_calls,
                finish_reason,
            } = self.invoke(conversation).await?;

            self.transition(TurnState::Classifying);
            trace!(
                "model finished ({finish_reason:?}) with {} tool call(s)",
                tool_calls.len()
            );
            if tool_calls.is_empty() {
                conversation.push_assistant(content.clone(), vec![]);
                self.transition(TurnState::Done);
                return Ok(TurnOutcome::Done { answer: content });
            }

            conversation.push_assistant(content, tool_calls.clone());
            if let Some(outcome) = self.route(conversation, tool_calls).await? {
                return Ok(outcome);
            }
        }
    }

    /// Routes the tool calls of one response, which is already in the
    /// conversation. Returns `None` if the model must be invoked again.
    async fn route(
        &self,
        conversation: &mut Conversation,
        tool_calls: Vec<ToolCallRequest>,
    ) -> Result<Option<TurnOutcome>, TurnError> {
        match self.classify(&tool_calls) {
            Route::Delegate => {
                self.transition(TurnState::AwaitExternal);
                Ok(Some(TurnOutcome::AwaitExternal {
                    pending: tool_calls,
                }))
            }
            Route::Dispatch => {
                self.dispatch_local(conversation, &tool_calls).await?;
                Ok(None)
            }
            Route::Partition { local, external } => {
                if !local.is_empty() {
                    self.dispatch_local(conversation, &local).await?;
                }
                if external.is_empty() {
                    return Ok(None);
                }
                self.transition(TurnState::AwaitExternal);
                Ok(Some(TurnOutcome::AwaitExternal { pending: external }))
            }
        }
    }

    fn classify(&self, tool_calls: &[ToolCallRequest]) -> Route {
        match self.config.routing {
            RoutingPolicy::FirstCallWins => match tool_calls.first() {
                Some(first) if self.capabilities.is_external(&first.name) => {
                    Route::Delegate
                }
                _ => Route::Dispatch,
            },
            RoutingPolicy::PerRequest => {
                let (external, local) = tool_calls
                    .iter()
                    .cloned()
                    .partition(|req| self.capabilities.is_external(&req.name));
                Route::Partition { local, external }
            }
        }
    }

    async fn invoke(
        &self,
        conversation: &Conversation,
    ) -> Result<AssistantResponse, TurnError> {
        if self.cancel.is_cancelled() {
            return Err(TurnError::Cancelled);
        }
        let events = self.events.clone();
        let fut = self.model_client.invoke(
            &self.config.system_prompt,
            conversation,
            self.capabilities,
            move |delta| events.emit(ControllerEvent::MessageDelta(delta)),
        );
        self.cancel
            .run_until_cancelled(fut)
            .await
            .ok_or(TurnError::Cancelled)?
    }

    async fn dispatch_local(
        &self,
        conversation: &mut Conversation,
        requests: &[ToolCallRequest],
    ) -> Result<(), TurnError> {
        self.transition(TurnState::DispatchLocal);
        for req in requests {
            self.events.emit(ControllerEvent::ToolDispatched(req.clone()));
        }

        let results = self
            .cancel
            .run_until_cancelled(executor::execute(requests, self.capabilities))
            .await
            .ok_or(TurnError::Cancelled)?;

        let appended: Vec<_> = results
            .iter()
            .map(|result| (result.id.clone(), result.is_error()))
            .collect();
        conversation.append_tool_results(results)?;
        for (id, is_error) in appended {
            self.events
                .emit(ControllerEvent::ToolResultAppended { id, is_error });
        }
        Ok(())
    }

    #[inline]
    fn transition(&self, state: TurnState) {
        debug!("turn state: {state:?}");
    }
}
