//! Collaborators the conversation yields to: a human answering the agent's
//! follow-up questions, and a side channel for progress notices.

use async_trait::async_trait;

/// What the human chose to do with a question.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElicitAction {
    Accept,
    Decline,
    /// Dismissed without answering (closed prompt, end of input).
    Cancel,
}

/// Answer to one elicitation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Elicitation {
    pub action: ElicitAction,
    pub data: Option<String>,
}

impl Elicitation {
    #[must_use]
    pub fn accept(data: impl Into<String>) -> Self {
        Self {
            action: ElicitAction::Accept,
            data: Some(data.into()),
        }
    }

    #[must_use]
    pub fn decline() -> Self {
        Self {
            action: ElicitAction::Decline,
            data: None,
        }
    }

    #[must_use]
    pub fn cancel() -> Self {
        Self {
            action: ElicitAction::Cancel,
            data: None,
        }
    }

    /// The accepted answer, if there is a non-blank one.
    #[must_use]
    pub fn answer(&self) -> Option<&str> {
        match self.action {
            ElicitAction::Accept => self.data.as_deref().filter(|d| !d.trim().is_empty()),
            ElicitAction::Decline | ElicitAction::Cancel => None,
        }
    }
}

/// Asks a human the agent's clarifying question. Usually backed by the CLI.
#[async_trait]
pub trait Elicitor: Send + Sync {
    async fn ask(&self, question: &str) -> Elicitation;
}

/// Receives progress notices that are not part of the answer.
pub trait ProgressSink: Send + Sync {
    fn notify(&self, text: &str);
}

/// Optional collaborators attached to one conversation.
#[derive(Clone, Copy, Default)]
pub struct Hooks<'a> {
    pub elicitor: Option<&'a dyn Elicitor>,
    pub progress: Option<&'a dyn ProgressSink>,
}

impl Hooks<'_> {
    pub(crate) fn notify(&self, text: &str) {
        if let Some(progress) = self.progress {
            progress.notify(text);
        }
    }
}
