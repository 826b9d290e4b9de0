#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod auth;
pub mod bridge;
pub mod cli;
pub mod config;
pub mod conversation;
pub mod elicit;
pub mod error;
pub mod session;
pub mod stream;
#[cfg(test)]
pub(crate) mod testing;
pub mod transport;

pub use bridge::Bridge;
pub use config::{Config, Settings};
pub use conversation::{AskOutcome, Conversation};
pub use error::{Error, Result};
