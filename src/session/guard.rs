use super::{Session, SessionController};
use crate::error::Error;
use std::sync::Arc;
use tracing::warn;

/// Owns an open session until it is closed.
///
/// Dropping an unclosed guard (for example when the owning future is
/// cancelled) spawns the end request on the current runtime.
#[derive(Debug)]
pub struct SessionGuard {
    controller: Arc<SessionController>,
    session: Session,
    closed: bool,
}

impl SessionGuard {
    pub(crate) fn new(controller: Arc<SessionController>, session: Session) -> Self {
        Self {
            controller,
            session,
            closed: false,
        }
    }

    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.session.id
    }

    /// End the session. Failures are returned for reporting only.
    ///
    /// If this future is dropped before the end request completes, the
    /// guard still ends the session in the background.
    pub async fn close(mut self) -> Result<(), Error> {
        let result = self.controller.end(&self.session.id).await;
        self.closed = true;
        result
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.closed {
            return;
        }

        let session_id = self.session.id.clone();
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(session_id = %session_id, "Session dropped outside a runtime; not ended");
            return;
        };

        warn!(session_id = %session_id, "Session dropped before close; ending in background");
        let controller = Arc::clone(&self.controller);
        handle.spawn(async move {
            if let Err(e) = controller.end(&session_id).await {
                warn!(session_id = %session_id, error = %e, "Failed to end dropped session");
            }
        });
    }
}
