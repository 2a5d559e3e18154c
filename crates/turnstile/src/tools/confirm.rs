use schemars::{JsonSchema, schema_for};
use serde::Deserialize;
use turnstile_core::conversation::{ToolCallRequest, ToolResultMessage};
use turnstile_core::tool::{Error as ToolError, ExternalAction};

/// Name of the action that asks the person at the terminal a yes/no
/// question.
pub const CONFIRM_WITH_USER: &str = "confirm_with_user";

/// Arguments of a [`CONFIRM_WITH_USER`] call.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, JsonSchema)]
pub struct ConfirmRequest {
    /// The question to ask.
    #[schemars(description = "A yes/no question for the user.")]
    pub question: String,
}

impl ConfirmRequest {
    /// Parses the arguments of a tool call.
    ///
    /// On failure, returns the error result to hand back to the model.
    pub fn from_tool_call(
        req: &ToolCallRequest,
    ) -> Result<Self, ToolResultMessage> {
        serde_json::from_value(req.arguments.clone()).map_err(|err| {
            warn!("malformed confirmation request {}: {err}", req.id);
            let err = ToolError::invalid_input().with_reason(err.to_string());
            ToolResultMessage::failure(&req.id, &err)
        })
    }

    /// Builds the result for the user's answer.
    #[inline]
    pub fn answer(id: &str, approved: bool) -> ToolResultMessage {
        let answer = if approved {
            "The user confirmed."
        } else {
            "The user declined."
        };
        ToolResultMessage::success(id, answer)
    }
}

/// Returns the definition of the [`CONFIRM_WITH_USER`] action.
pub fn confirm_with_user() -> ExternalAction {
    ExternalAction::new(
        CONFIRM_WITH_USER,
        "Ask the user to confirm something before going on.",
    )
    .with_parameters(schema_for!(ConfirmRequest).to_value())
}
