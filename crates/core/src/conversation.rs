//! Conversation-related types.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use turnstile_model::{ModelMessage, ToolCallResult};

pub use turnstile_model::ToolCallRequest;

use crate::error::ConversationError;
use crate::tool::{self, ToolResult};

/// A message of the conversation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    /// A message typed by the human.
    Human {
        /// Text of the message.
        content: String,
    },
    /// A message produced by the model.
    Assistant {
        /// Text of the message, may be empty when tool calls are present.
        content: String,
        /// Tool calls requested by the model, in the order it produced them.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCallRequest>,
    },
    /// The result of one tool call.
    ToolResult(ToolResultMessage),
}

impl Message {
    /// Returns the text of the message.
    #[inline]
    pub fn content(&self) -> &str {
        match self {
            Message::Human { content } | Message::Assistant { content, .. } => {
                content
            }
            Message::ToolResult(result) => &result.content,
        }
    }

    fn to_model_message(&self) -> ModelMessage {
        match self {
            Message::Human { content } => ModelMessage::User {
                content: content.clone(),
            },
            Message::Assistant {
                content,
                tool_calls,
            } => ModelMessage::Assistant {
                content: content.clone(),
                tool_calls: tool_calls.clone(),
            },
            Message::ToolResult(result) => ModelMessage::Tool(ToolCallResult {
                id: result.id.clone(),
                content: result.content.clone(),
                is_error: result.is_error(),
            }),
        }
    }
}

/// The outcome of a tool call, correlated to its request by `id`.
///
/// Hosts build these to answer the external actions of a suspended turn.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResultMessage {
    /// Correlation id of the answered tool call.
    pub id: String,
    /// The payload handed back to the model.
    pub content: String,
    /// The kind of failure, if the tool call failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<tool::ErrorKind>,
}

impl ToolResultMessage {
    /// Creates a successful result.
    #[inline]
    pub fn success<I, C>(id: I, content: C) -> Self
    where
        I: Into<String>,
        C: Into<String>,
    {
        Self {
            id: id.into(),
            content: content.into(),
            error: None,
        }
    }

    /// Creates a failed result from a tool error.
    #[inline]
    pub fn failure<I: Into<String>>(id: I, error: &tool::Error) -> Self {
        Self {
            id: id.into(),
            content: format!("Error: {error}"),
            error: Some(error.kind()),
        }
    }

    /// Creates a result from the output of a tool.
    #[inline]
    pub fn from_tool_result<I>(id: I, result: ToolResult) -> Self
    where
        I: Into<String>,
    {
        match result {
            Ok(content) => Self::success(id, content),
            Err(err) => Self::failure(id, &err),
        }
    }

    /// Returns whether the tool call failed.
    #[inline]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// An append-only log of the messages exchanged in one conversation.
///
/// Every tool result in the log answers exactly one earlier tool call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Conversation {
    id: String,
    messages: Vec<Message>,
}

impl Conversation {
    pub(crate) fn new<S: Into<String>>(id: S) -> Self {
        Self {
            id: id.into(),
            messages: vec![],
        }
    }

    /// Returns the id of the conversation.
    #[inline]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the messages in the order they were appended.
    #[inline]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Returns the number of messages.
    #[inline]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Returns whether the conversation has no messages.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Returns the tool calls that have no result yet, in request order.
    pub fn unanswered_tool_calls(&self) -> Vec<&ToolCallRequest> {
        let answered: HashSet<&str> = self.answered_ids().collect();
        self.requested_calls()
            .filter(|req| !answered.contains(req.id.as_str()))
            .collect()
    }

    /// Returns whether a tool call with the given id was ever requested.
    pub fn has_tool_call(&self, id: &str) -> bool {
        self.requested_calls().any(|req| req.id == id)
    }

    pub(crate) fn push_human(&mut self, content: String) {
        self.messages.push(Message::Human { content });
    }

    pub(crate) fn push_assistant(
        &mut self,
        content: String,
        tool_calls: Vec<ToolCallRequest>,
    ) {
        self.messages.push(Message::Assistant {
            content,
            tool_calls,
        });
    }

    /// Checks that a batch of results can be appended as a whole.
    pub(crate) fn check_tool_results(
        &self,
        results: &[ToolResultMessage],
    ) -> Result<(), ConversationError> {
        let unanswered: HashSet<&str> = self
            .unanswered_tool_calls()
            .into_iter()
            .map(|req| req.id.as_str())
            .collect();
        let mut seen = HashSet::with_capacity(results.len());
        for result in results {
            let id = result.id.as_str();
            if unanswered.contains(id) && seen.insert(id) {
                continue;
            }
            let id = id.to_owned();
            return Err(if self.has_tool_call(&id) {
                ConversationError::DuplicateToolResult { id }
            } else {
                ConversationError::UnmatchedToolResult { id }
            });
        }
        Ok(())
    }

    /// Appends a batch of results, or nothing if any of them is rejected.
    pub(crate) fn append_tool_results(
        &mut self,
        results: Vec<ToolResultMessage>,
    ) -> Result<(), ConversationError> {
        self.check_tool_results(&results)?;
        self.messages
            .extend(results.into_iter().map(Message::ToolResult));
        Ok(())
    }

    pub(crate) fn to_model_messages(
        &self,
    ) -> impl Iterator<Item = ModelMessage> + '_ {
        self.messages.iter().map(Message::to_model_message)
    }

    fn requested_calls(&self) -> impl Iterator<Item = &ToolCallRequest> {
        self.messages.iter().flat_map(|msg| match msg {
            Message::Assistant { tool_calls, .. } => tool_calls.as_slice(),
            _ => &[],
        })
    }

    fn answered_ids(&self) -> impl Iterator<Item = &str> {
        self.messages.iter().filter_map(|msg| match msg {
            Message::ToolResult(result) => Some(result.id.as_str()),
            _ => None,
        })
    }
}
