//! An abstraction layer for different LLMs.
//!
//! This crate establishes an unified protocol for the turn controller to
//! interact with various language models, so that the controller never
//! depends on a particular model or tool-calling API.
//!
//! Types in this crate don't define any behavior, instead they are the
//! constraints that the implementors should adhere to. Provider selection
//! and authentication are left to the implementors and their hosts.

#![deny(missing_docs)]

mod error;
mod provider;
mod request;
mod response;

pub use error::*;
pub use provider::*;
pub use request::*;
pub use response::*;
