//! Agent session lifecycle.
//!
//! A session is opened per user turn and must be ended on every exit path.
//! [`SessionController::open`] hands out a [`SessionGuard`] that owns that
//! obligation: close it explicitly, or dropping it ends the session in the
//! background.

mod guard;

pub use guard::SessionGuard;

use crate::error::Error;
use crate::transport::AuthenticatedTransport;
use reqwest::Method;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Header telling the platform why a session was closed.
pub const END_REASON_HEADER: &str = "x-session-end-reason";
pub const END_REASON_USER_REQUEST: &str = "UserRequest";

/// An open remote conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Opaque id assigned by the remote service.
    pub id: String,
    /// Caller-chosen key identifying this logical user turn.
    pub external_key: Uuid,
}

/// Opens and closes sessions on one agent.
#[derive(Debug)]
pub struct SessionController {
    transport: Arc<AuthenticatedTransport>,
    agent_id: String,
    instance_endpoint: String,
}

impl SessionController {
    pub fn new(
        transport: Arc<AuthenticatedTransport>,
        agent_id: impl Into<String>,
        instance_endpoint: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            agent_id: agent_id.into(),
            instance_endpoint: instance_endpoint.into(),
        }
    }

    #[must_use]
    pub fn transport(&self) -> &Arc<AuthenticatedTransport> {
        &self.transport
    }

    /// Create a session and return the id the service assigned.
    pub async fn start(&self, external_key: &str) -> Result<String, Error> {
        let path = format!("/agents/{}/sessions", urlencoding::encode(&self.agent_id));
        let body = json!({
            "externalSessionKey": external_key,
            "streamingCapabilities": {
                "chunkTypes": ["Text"]
            },
            "bypassUser": false,
            "instanceConfig": {
                "endpoint": self.instance_endpoint
            }
        });

        let response = self.transport.post_json(&path, &body).await?;
        let session_id = response
            .get("sessionId")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| Error::Decode(format!("Session response has no sessionId: {response}")))?;

        info!(session_id, external_key, "Session started");
        Ok(session_id.to_string())
    }

    /// Delete the session on the remote side.
    pub async fn end(&self, session_id: &str) -> Result<(), Error> {
        let path = format!("/sessions/{}", urlencoding::encode(session_id));
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static(END_REASON_HEADER),
            HeaderValue::from_static(END_REASON_USER_REQUEST),
        );
        self.transport
            .request(Method::DELETE, &path, None, headers)
            .await?;
        info!(session_id, "Session ended");
        Ok(())
    }

    /// Start a session and guard its cleanup.
    pub async fn open(self: &Arc<Self>, external_key: Uuid) -> Result<SessionGuard, Error> {
        let id = self.start(&external_key.to_string()).await?;
        Ok(SessionGuard::new(
            Arc::clone(self),
            Session { id, external_key },
        ))
    }
}
