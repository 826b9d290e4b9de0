//! One logical user turn: open a session, stream the reply, end the session.
//!
//! Callers always get an outcome back. Errors after the session request are
//! turned into a final `[ERROR: ...]` fragment so partial answers survive.

use crate::elicit::Hooks;
use crate::error::Error;
use crate::session::SessionController;
use crate::stream::{Outcome, StreamProcessor};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Fragments buffered between the stream and a slow consumer.
pub const FRAGMENT_BUFFER: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AskOutcome {
    Completed,
    Declined,
    Dismissed,
    /// Cancelled by the caller, or the fragment receiver went away.
    Interrupted,
    /// The error message that was also emitted as the last fragment.
    Failed(String),
}

impl From<Outcome> for AskOutcome {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Completed => Self::Completed,
            Outcome::Declined => Self::Declined,
            Outcome::Dismissed => Self::Dismissed,
        }
    }
}

impl AskOutcome {
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

pub struct Conversation {
    sessions: Arc<SessionController>,
    processor: StreamProcessor,
}

impl Conversation {
    pub fn new(sessions: Arc<SessionController>) -> Self {
        let processor = StreamProcessor::new(Arc::clone(sessions.transport()));
        Self {
            sessions,
            processor,
        }
    }

    /// Run one query and forward its fragments to `tx`.
    pub async fn ask(
        &self,
        query: &str,
        hooks: Hooks<'_>,
        tx: &mpsc::Sender<String>,
        cancel: &CancellationToken,
    ) -> AskOutcome {
        if cancel.is_cancelled() {
            return AskOutcome::Interrupted;
        }

        let external_key = Uuid::new_v4();
        hooks.notify(&format!(
            "Starting agent session with external key: {external_key}"
        ));

        let session = match self.sessions.open(external_key).await {
            Ok(session) => session,
            Err(e) => return fail(e, hooks, tx).await,
        };
        let session_id = session.id().to_string();
        hooks.notify(&format!(
            "Agent session ID received: {session_id}. Streaming query..."
        ));

        let outcome = match self
            .processor
            .send(&session_id, query, hooks, tx, cancel)
            .await
        {
            Ok(outcome) => {
                hooks.notify("Agent stream completed.");
                outcome.into()
            }
            Err(Error::Cancelled) => {
                info!(session_id = %session_id, "Conversation interrupted");
                AskOutcome::Interrupted
            }
            Err(e) => fail(e, hooks, tx).await,
        };

        match session.close().await {
            Ok(()) => hooks.notify(&format!("Agent session {session_id} ended successfully.")),
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Failed to gracefully end session");
                hooks.notify(&format!(
                    "Failed to gracefully end agent session {session_id}: {e}"
                ));
            }
        }

        outcome
    }

    /// Run one query and assemble the whole answer.
    pub async fn ask_collect(
        &self,
        query: &str,
        hooks: Hooks<'_>,
        cancel: &CancellationToken,
    ) -> (String, AskOutcome) {
        let (tx, mut rx) = mpsc::channel(FRAGMENT_BUFFER);
        let produce = async move {
            let outcome = self.ask(query, hooks, &tx, cancel).await;
            drop(tx);
            outcome
        };
        let collect = async {
            let mut response = String::new();
            while let Some(fragment) = rx.recv().await {
                response.push_str(&fragment);
            }
            response
        };

        let (outcome, response) = tokio::join!(produce, collect);
        (response, outcome)
    }
}

async fn fail(err: Error, hooks: Hooks<'_>, tx: &mpsc::Sender<String>) -> AskOutcome {
    let detail = format!("An error occurred during agent operation: {err}");
    error!("{detail}");
    hooks.notify(&detail);
    // The receiver may already be gone; the outcome still carries the message
    let _ = tx.send(format!("\n[ERROR: {detail}]")).await;
    AskOutcome::Failed(detail)
}
