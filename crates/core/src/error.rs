use thiserror::Error;
use turnstile_model::ErrorKind as ModelErrorKind;

/// Errors that abort a turn and are surfaced to the caller.
///
/// Failures of a single tool invocation are not represented here, they are
/// recovered into error-bearing tool results instead (see
/// [`crate::tool::Error`]).
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum TurnError {
    /// The model could not be reached.
    #[error("model unavailable ({kind}): {message}")]
    ModelUnavailable {
        /// Kind reported by the model provider.
        kind: ModelErrorKind,
        /// Message reported by the model provider.
        message: String,
    },

    /// The model answered, but the answer could not be classified.
    #[error("malformed model response: {0}")]
    MalformedResponse(String),

    /// The turn invoked the model too many times.
    #[error("iteration limit exceeded after {limit} model invocations")]
    IterationLimitExceeded {
        /// The configured limit.
        limit: u32,
    },

    /// The caller cancelled the turn.
    #[error("turn cancelled")]
    Cancelled,

    /// No conversation exists with the given id.
    #[error("unknown conversation: {0}")]
    UnknownConversation(String),

    /// The input is inconsistent with the conversation.
    #[error(transparent)]
    Conversation(#[from] ConversationError),
}

impl TurnError {
    /// Returns whether resuming the same conversation may succeed without
    /// any change from the caller.
    ///
    /// Only transient model failures (see
    /// [`ModelErrorKind::is_transient`]) and cancellations qualify.
    #[inline]
    pub fn is_retryable(&self) -> bool {
        match self {
            TurnError::ModelUnavailable { kind, .. } => kind.is_transient(),
            TurnError::Cancelled => true,
            _ => false,
        }
    }
}

/// Violations of the conversation invariants.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ConversationError {
    /// A tool result doesn't answer any tool call of the conversation.
    #[error("tool result `{id}` does not answer any tool call")]
    UnmatchedToolResult {
        /// Correlation id of the rejected result.
        id: String,
    },

    /// A tool call has already been answered.
    #[error("tool call `{id}` has already been answered")]
    DuplicateToolResult {
        /// Correlation id of the rejected result.
        id: String,
    },

    /// A new human message arrived while tool calls are still unanswered.
    #[error("{} tool call(s) are still waiting for results", ids.len())]
    PendingToolCalls {
        /// Correlation ids of the unanswered tool calls.
        ids: Vec<String>,
    },
}
