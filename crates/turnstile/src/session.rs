use turnstile_core::conversation::{Conversation, ToolResultMessage};
use turnstile_core::tool::ExternalAction;
use turnstile_core::{Agent, AgentBuilder, TurnConfig, TurnStream};
use turnstile_model::ModelProvider;

use crate::tools::*;

const DEFAULT_CONVERSATION_ID: &str = "main";

/// A session builder.
///
/// See [`Session`].
pub struct SessionBuilder {
    agent_builder: AgentBuilder,
    conversation_id: String,
    external_actions: Vec<ExternalAction>,
}

impl SessionBuilder {
    /// Creates a session builder with a specified model provider.
    pub fn with_model_provider<M: ModelProvider + 'static>(
        provider: M,
    ) -> Self {
        let agent_builder = AgentBuilder::with_model_provider(provider);
        Self {
            agent_builder,
            conversation_id: DEFAULT_CONVERSATION_ID.to_owned(),
            external_actions: vec![confirm_with_user()],
        }
    }

    /// Sets the turn configuration of the agent.
    #[inline]
    pub fn with_config(mut self, config: TurnConfig) -> Self {
        self.agent_builder = self.agent_builder.with_config(config);
        self
    }

    /// Sets the id of the conversation the session talks in.
    #[inline]
    pub fn with_conversation_id<S: Into<String>>(mut self, id: S) -> Self {
        self.conversation_id = id.into();
        self
    }

    /// Declares one more action the host performs itself.
    #[inline]
    pub fn with_external_action(mut self, action: ExternalAction) -> Self {
        self.external_actions.push(action);
        self
    }

    /// Builds a new session.
    pub fn build(self) -> Session {
        let agent = self
            .agent_builder
            .with_tool(GetWeatherTool::new())
            .build();

        Session {
            agent,
            conversation_id: self.conversation_id,
            external_actions: self.external_actions,
        }
    }
}

/// A chat session, like a window that displays messages and has a input box.
///
/// The session holds a fully configured agent that you can use directly, and
/// it is basically a wrapper around [`Agent`] bound to one conversation.
pub struct Session {
    agent: Agent,
    conversation_id: String,
    external_actions: Vec<ExternalAction>,
}

impl Session {
    /// Sends a message to the session.
    #[inline]
    pub fn send_message(&self, message: &str) -> TurnStream {
        self.agent.stream(
            &*self.conversation_id,
            message,
            self.external_actions.clone(),
        )
    }

    /// Answers the actions the last turn is waiting for.
    #[inline]
    pub fn submit_results(
        &self,
        results: Vec<ToolResultMessage>,
    ) -> TurnStream {
        self.agent.resume_stream(
            &*self.conversation_id,
            results,
            self.external_actions.clone(),
        )
    }

    /// Picks up the last turn again after it failed.
    #[inline]
    pub fn retry(&self) -> TurnStream {
        self.submit_results(vec![])
    }

    /// Returns a snapshot of the conversation.
    pub async fn conversation(&self) -> Option<Conversation> {
        self.agent.conversation(&self.conversation_id).await
    }

    /// Returns the underlying agent.
    #[inline]
    pub fn agent(&self) -> &Agent {
        &self.agent
    }
}
