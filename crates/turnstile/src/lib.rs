//! An out-of-the-box agent that assembles the demo tools, the host actions
//! and an OpenAI-compatible model provider.
//!
//! The crate includes a CLI tool for using in the terminal. And you can also
//! use it as a library to bring the agent into your own host apps.

#![deny(missing_docs)]

#[allow(unused_imports)]
#[macro_use]
extern crate tracing;

pub mod config;
mod retry;
mod session;
pub mod tools;

pub use retry::RetryPolicy;
pub use session::{Session, SessionBuilder};

/// Re-exports of [`turnstile_core`] crate.
pub mod core {
    pub use turnstile_core::*;
}
