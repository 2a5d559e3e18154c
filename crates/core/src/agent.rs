mod builder;
mod session;
mod stream;
#[cfg(test)]
mod tests;

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

pub use builder::AgentBuilder;
use session::{Prepared, SessionStore};
pub use stream::TurnStream;

use crate::config::TurnConfig;
use crate::controller::{
    ControllerEvent, EventSink, TurnController, TurnOutcome,
};
use crate::conversation::{Conversation, ToolResultMessage};
use crate::error::TurnError;
use crate::model_client::ModelClient;
use crate::tool::{CapabilitySet, ExternalAction, ToolRegistry};

/// What starts a turn.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TurnInput {
    /// A new human message.
    Human(String),
    /// Results for the tool calls a suspended turn is waiting for.
    ///
    /// An empty batch retries a failed turn, or reports the current state
    /// of a finished one.
    ToolResults(Vec<ToolResultMessage>),
}

/// The state of a conversation after a turn.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TurnReport {
    /// Snapshot of the conversation.
    pub conversation: Conversation,
    /// How the turn stopped.
    pub outcome: TurnOutcome,
}

/// An agent that runs conversation turns against a model, with a set of
/// local tools.
///
/// The agent keeps one conversation per id. Turns of the same conversation
/// are serialized: a turn waits until the previous one has stopped. Turns
/// of different conversations run independently.
///
/// Cloning an agent is cheap, and clones share their conversations.
#[derive(Clone)]
pub struct Agent {
    inner: Arc<Inner>,
}

struct Inner {
    model_client: ModelClient,
    tools: ToolRegistry,
    config: TurnConfig,
    sessions: SessionStore,
}

impl Agent {
    fn from_builder(builder: AgentBuilder) -> Self {
        let AgentBuilder {
            model_client,
            tools,
            config,
        } = builder;
        let inner = Inner {
            model_client,
            tools,
            config,
            sessions: SessionStore::default(),
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Returns the turn configuration.
    #[inline]
    pub fn config(&self) -> &TurnConfig {
        &self.inner.config
    }

    /// Returns the local tools.
    #[inline]
    pub fn tools(&self) -> &ToolRegistry {
        &self.inner.tools
    }

    /// Appends a human message to the conversation, creating it if needed,
    /// and runs a turn.
    pub async fn invoke<S: Into<String>>(
        &self,
        conversation_id: &str,
        message: S,
        external_actions: &[ExternalAction],
    ) -> Result<TurnReport, TurnError> {
        let input = TurnInput::Human(message.into());
        let cancel = CancellationToken::new();
        self.run(conversation_id, input, external_actions, cancel)
            .await
    }

    /// Supplies results for a suspended turn and continues it.
    pub async fn resume(
        &self,
        conversation_id: &str,
        results: Vec<ToolResultMessage>,
        external_actions: &[ExternalAction],
    ) -> Result<TurnReport, TurnError> {
        let input = TurnInput::ToolResults(results);
        let cancel = CancellationToken::new();
        self.run(conversation_id, input, external_actions, cancel)
            .await
    }

    /// Runs a turn that stops early with [`TurnError::Cancelled`] once
    /// `cancel` is triggered.
    pub async fn run(
        &self,
        conversation_id: &str,
        input: TurnInput,
        external_actions: &[ExternalAction],
        cancel: CancellationToken,
    ) -> Result<TurnReport, TurnError> {
        let events = EventSink::default();
        let actions = external_actions;
        self.run_turn(conversation_id, input, actions, &events, &cancel)
            .await
    }

    /// Like [`Agent::invoke`], but reports the progress as a stream of
    /// events.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn stream<I, S>(
        &self,
        conversation_id: I,
        message: S,
        external_actions: Vec<ExternalAction>,
    ) -> TurnStream
    where
        I: Into<String>,
        S: Into<String>,
    {
        let input = TurnInput::Human(message.into());
        self.stream_input(conversation_id, input, external_actions)
    }

    /// Like [`Agent::resume`], but reports the progress as a stream of
    /// events.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn resume_stream<I: Into<String>>(
        &self,
        conversation_id: I,
        results: Vec<ToolResultMessage>,
        external_actions: Vec<ExternalAction>,
    ) -> TurnStream {
        let input = TurnInput::ToolResults(results);
        self.stream_input(conversation_id, input, external_actions)
    }

    /// Runs a turn in the background and returns its events.
    ///
    /// Dropping the returned stream cancels the turn.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn stream_input<I: Into<String>>(
        &self,
        conversation_id: I,
        input: TurnInput,
        external_actions: Vec<ExternalAction>,
    ) -> TurnStream {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let agent = self.clone();
        let conversation_id = conversation_id.into();
        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            let events = EventSink::new(events_tx);
            agent
                .run_turn(
                    &conversation_id,
                    input,
                    &external_actions,
                    &events,
                    &task_cancel,
                )
                .await
                .ok();
        });

        TurnStream::new(events_rx, cancel)
    }

    /// Returns a snapshot of the conversation.
    ///
    /// Waits for the running turn of the conversation, if any.
    pub async fn conversation(
        &self,
        conversation_id: &str,
    ) -> Option<Conversation> {
        let session = self.inner.sessions.get(conversation_id)?;
        let session = session.lock().await;
        Some(session.conversation().clone())
    }

    /// Returns the ids of all conversations, sorted.
    #[inline]
    pub fn conversation_ids(&self) -> Vec<String> {
        self.inner.sessions.ids()
    }

    /// Forgets a conversation. Returns whether it existed.
    ///
    /// A turn already running for the conversation still completes.
    #[inline]
    pub fn end_conversation(&self, conversation_id: &str) -> bool {
        self.inner.sessions.remove(conversation_id)
    }

    async fn run_turn(
        &self,
        conversation_id: &str,
        input: TurnInput,
        external_actions: &[ExternalAction],
        events: &EventSink,
        cancel: &CancellationToken,
    ) -> Result<TurnReport, TurnError> {
        let span = info_span!("turn", conversation = conversation_id);
        let result = self
            .drive(conversation_id, input, external_actions, events, cancel)
            .instrument(span)
            .await;
        match &result {
            Ok(report) => {
                debug!("turn stopped: {:?}", report.outcome.state());
                events.emit((&report.outcome).into());
            }
            Err(err) => {
                warn!("turn failed: {err}");
                events.emit(ControllerEvent::Failed(err.clone()));
            }
        }
        result
    }

    async fn drive(
        &self,
        conversation_id: &str,
        input: TurnInput,
        external_actions: &[ExternalAction],
        events: &EventSink,
        cancel: &CancellationToken,
    ) -> Result<TurnReport, TurnError> {
        let sessions = &self.inner.sessions;
        let session = match &input {
            TurnInput::Human(_) => sessions.get_or_create(conversation_id),
            TurnInput::ToolResults(_) => sessions
                .get(conversation_id)
                .ok_or_else(|| {
                    TurnError::UnknownConversation(conversation_id.to_owned())
                })?,
        };
        // Held for the whole turn.
        let mut session = session.lock().await;

        let entry = match session.prepare(input)? {
            Prepared::Stopped(outcome) => return Ok(session.report(outcome)),
            Prepared::Run(entry) => entry,
        };

        let capabilities =
            CapabilitySet::merge(&self.inner.tools, external_actions);
        trace!("capabilities: {capabilities:?}");
        let controller = TurnController {
            config: &self.inner.config,
            model_client: &self.inner.model_client,
            capabilities: &capabilities,
            events,
            cancel,
        };
        let result = controller.run(session.conversation_mut(), entry).await;
        session.finish(result)
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("tools", &self.inner.tools)
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}
