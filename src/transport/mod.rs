//! Authenticated HTTP access to the agent API.

mod client;
mod error;

pub use client::{AuthenticatedTransport, CONNECT_TIMEOUT};
pub use error::format_api_error;
