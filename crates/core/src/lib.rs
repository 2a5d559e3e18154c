//! Core logic of a tool-augmented, interruptible conversation loop: the
//! turn controller, tool execution, conversation state and the entry points
//! hosts use to drive them.

#![deny(missing_docs)]
#![deny(clippy::missing_safety_doc)]

#[macro_use]
extern crate tracing;

mod agent;
pub mod config;
mod controller;
pub mod conversation;
mod error;
mod model_client;
pub mod tool;

#[cfg(test)]
mod testing;

pub use agent::{Agent, AgentBuilder, TurnInput, TurnReport, TurnStream};
pub use config::{RoutingPolicy, TurnConfig, TurnConfigBuilder};
pub use controller::{ControllerEvent, TurnOutcome, TurnState};
pub use error::{ConversationError, TurnError};
pub use tokio_util::sync::CancellationToken;
