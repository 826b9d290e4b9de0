//! Typed agent events carried on `data:` lines.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// One decoded event from the agent's stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Part of the answer text.
    TextChunk(String),
    /// Structured result, rendered as indented JSON.
    Inform(Value),
    /// Status notice for the side channel.
    ProgressIndicator(String),
    /// The agent needs an answer from the human before continuing.
    Inquire(String),
}

/// A `data:` line whose payload is not JSON.
#[derive(Debug, Error)]
#[error("malformed event data {data:?}: {source}")]
pub struct MalformedEvent {
    pub data: String,
    #[source]
    source: serde_json::Error,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum RawMessage {
    TextChunk { message: String },
    Inform { result: Value },
    ProgressIndicator { message: String },
    Inquire { message: String },
}

impl From<RawMessage> for StreamEvent {
    fn from(raw: RawMessage) -> Self {
        match raw {
            RawMessage::TextChunk { message } => Self::TextChunk(message),
            RawMessage::Inform { result } => Self::Inform(result),
            RawMessage::ProgressIndicator { message } => Self::ProgressIndicator(message),
            RawMessage::Inquire { message } => Self::Inquire(message),
        }
    }
}

/// Decode one line of the stream.
///
/// Returns `Ok(None)` for lines that carry no event: non-`data:` lines,
/// payloads without a `message` object, and unknown event types.
pub fn decode_line(line: &str) -> Result<Option<StreamEvent>, MalformedEvent> {
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(None);
    };
    let data = data.trim();

    let payload: Value = serde_json::from_str(data).map_err(|source| MalformedEvent {
        data: data.to_string(),
        source,
    })?;

    let Some(message) = payload.get("message") else {
        return Ok(None);
    };

    match RawMessage::deserialize(message) {
        Ok(raw) => Ok(Some(raw.into())),
        Err(e) => {
            debug!(error = %e, "Ignoring event with unexpected shape");
            Ok(None)
        }
    }
}

/// Render an `Inform` result as an answer fragment.
#[must_use]
pub fn format_inform(result: &Value) -> String {
    let pretty = serde_json::to_string_pretty(result).unwrap_or_else(|_| result.to_string());
    format!("\n\n{pretty}")
}
