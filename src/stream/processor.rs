//! Sends user messages into a session and relays the agent's streamed reply.
//!
//! Each round opens a new stream on the session. When the agent asks a
//! question and the human accepts, the answer becomes the next round's
//! message; the rest of the current stream is abandoned.

use super::event::{StreamEvent, decode_line, format_inform};
use super::lines::LineBuffer;
use crate::elicit::{ElicitAction, Hooks};
use crate::error::Error;
use crate::transport::AuthenticatedTransport;
use futures::StreamExt;
use reqwest::Response;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How a send sequence finished without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The last stream ended with no pending question.
    Completed,
    /// The human declined to answer a question.
    Declined,
    /// The question was dismissed, or accepted without an answer.
    Dismissed,
}

/// Result of consuming one stream.
enum Round {
    Finished,
    Answered(String),
    Stopped(Outcome),
}

#[derive(Debug, Clone)]
pub struct StreamProcessor {
    transport: Arc<AuthenticatedTransport>,
}

impl StreamProcessor {
    pub fn new(transport: Arc<AuthenticatedTransport>) -> Self {
        Self { transport }
    }

    /// Send `text` and forward answer fragments to `tx` in arrival order.
    ///
    /// Fragments from follow-up rounds are sent before this returns. A closed
    /// receiver or a cancelled token ends the sequence with [`Error::Cancelled`].
    pub async fn send(
        &self,
        session_id: &str,
        text: &str,
        hooks: Hooks<'_>,
        tx: &mpsc::Sender<String>,
        cancel: &CancellationToken,
    ) -> Result<Outcome, Error> {
        let path = format!(
            "/sessions/{}/messages/stream",
            urlencoding::encode(session_id)
        );
        let mut message = text.to_string();
        let mut round = 1u32;

        loop {
            info!(session_id, round, "Sending message");
            let body = message_body(&message);
            let response = tokio::select! {
                () = cancel.cancelled() => return Err(Error::Cancelled),
                response = self.transport.post_stream(&path, &body) => response?,
            };

            match consume(response, hooks, tx, cancel).await? {
                Round::Finished => return Ok(Outcome::Completed),
                Round::Stopped(outcome) => return Ok(outcome),
                Round::Answered(answer) => {
                    emit(tx, format!("\n\n{answer}\n\n")).await?;
                    message = answer;
                    round += 1;
                }
            }
        }
    }
}

fn message_body(text: &str) -> Value {
    json!({
        "message": {
            "sequenceId": 1,
            "type": "Text",
            "text": text,
        }
    })
}

async fn consume(
    response: Response,
    hooks: Hooks<'_>,
    tx: &mpsc::Sender<String>,
    cancel: &CancellationToken,
) -> Result<Round, Error> {
    let mut body = response.bytes_stream();
    let mut lines = LineBuffer::new();

    loop {
        let next = tokio::select! {
            () = cancel.cancelled() => return Err(Error::Cancelled),
            next = body.next() => next,
        };

        let Some(chunk) = next else {
            if let Some(line) = lines.finish()
                && let Some(round) = dispatch(&line, hooks, tx, cancel).await?
            {
                return Ok(round);
            }
            return Ok(Round::Finished);
        };

        let chunk = chunk.map_err(|e| Error::Stream(e.to_string()))?;
        for line in lines.feed(&chunk) {
            if let Some(round) = dispatch(&line, hooks, tx, cancel).await? {
                return Ok(round);
            }
        }
    }
}

/// Handle one line. Returns a round result when the line ends the stream.
async fn dispatch(
    line: &str,
    hooks: Hooks<'_>,
    tx: &mpsc::Sender<String>,
    cancel: &CancellationToken,
) -> Result<Option<Round>, Error> {
    debug!(line, "Raw line");

    let event = match decode_line(line) {
        Ok(Some(event)) => event,
        Ok(None) => return Ok(None),
        Err(e) => {
            warn!(error = %e, "Skipping non-JSON data line");
            return Ok(None);
        }
    };

    match event {
        StreamEvent::TextChunk(text) => emit(tx, text).await?,
        StreamEvent::Inform(result) => emit(tx, format_inform(&result)).await?,
        StreamEvent::ProgressIndicator(text) => hooks.notify(&text),
        StreamEvent::Inquire(question) => return inquire(&question, hooks, cancel).await,
    }
    Ok(None)
}

async fn inquire(
    question: &str,
    hooks: Hooks<'_>,
    cancel: &CancellationToken,
) -> Result<Option<Round>, Error> {
    let Some(elicitor) = hooks.elicitor else {
        warn!(question, "Agent asked a question but nobody can answer; continuing");
        return Ok(None);
    };

    info!(question, "Agent inquiry");
    let elicitation = tokio::select! {
        () = cancel.cancelled() => return Err(Error::Cancelled),
        elicitation = elicitor.ask(question) => elicitation,
    };

    let round = match elicitation.action {
        ElicitAction::Accept => match elicitation.answer() {
            Some(answer) => {
                info!(answer, "Elicitation accepted");
                Round::Answered(answer.to_string())
            }
            None => {
                warn!("Elicitation accepted without an answer");
                Round::Stopped(Outcome::Dismissed)
            }
        },
        ElicitAction::Decline => {
            info!("Elicitation declined");
            Round::Stopped(Outcome::Declined)
        }
        ElicitAction::Cancel => {
            info!("Elicitation dismissed");
            Round::Stopped(Outcome::Dismissed)
        }
    };
    Ok(Some(round))
}

async fn emit(tx: &mpsc::Sender<String>, fragment: String) -> Result<(), Error> {
    if fragment.is_empty() {
        return Ok(());
    }
    tx.send(fragment).await.map_err(|_| Error::Cancelled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elicit::Elicitation;
    use crate::elicit::tests::{RecordingProgress, ScriptedElicitor, SilentElicitor};
    use crate::session::tests::{TOKEN_PATH, controller};
    use crate::testing::{MockResponse, MockServer};
    use std::time::Duration;

    const STREAM_PATH: &str = "/sessions/sess-1/messages/stream";

    fn processor(server: &MockServer) -> StreamProcessor {
        let sessions = controller(server);
        StreamProcessor::new(Arc::clone(sessions.transport()))
    }

    async fn run(
        processor: &StreamProcessor,
        hooks: Hooks<'_>,
        cancel: &CancellationToken,
    ) -> (Result<Outcome, Error>, Vec<String>) {
        let (tx, mut rx) = mpsc::channel(2);
        let send = async move {
            let result = processor.send("sess-1", "Hello", hooks, &tx, cancel).await;
            drop(tx);
            result
        };
        let drain = async {
            let mut fragments = Vec::new();
            while let Some(fragment) = rx.recv().await {
                fragments.push(fragment);
            }
            fragments
        };
        tokio::join!(send, drain)
    }

    #[tokio::test]
    async fn test_text_and_inform_in_order() {
        let server = MockServer::start();
        server.enqueue(
            "POST",
            STREAM_PATH,
            MockResponse::sse(&[
                r#"data: {"message":{"type":"TextChunk","message":"Hi"}}"#,
                r#"data: {"message":{"type":"Inform","result":{"a":1}}}"#,
            ]),
        );
        let processor = processor(&server);

        let (result, fragments) = run(&processor, Hooks::default(), &CancellationToken::new()).await;
        assert_eq!(result.unwrap(), Outcome::Completed);
        assert_eq!(fragments, vec!["Hi", "\n\n{\n  \"a\": 1\n}"]);

        let request = &server.requests_to("POST", STREAM_PATH)[0];
        assert_eq!(request.header("accept"), Some("text/event-stream"));
        assert_eq!(
            request.json(),
            json!({"message": {"sequenceId": 1, "type": "Text", "text": "Hello"}})
        );
    }

    #[tokio::test]
    async fn test_malformed_line_skipped() {
        let server = MockServer::start();
        server.enqueue(
            "POST",
            STREAM_PATH,
            MockResponse::sse(&[
                r#"data: {"message":{"type":"TextChunk","message":"one"}}"#,
                "data: not-json",
                r#"data: {"message":{"type":"TextChunk","message":"two"}}"#,
            ]),
        );
        let processor = processor(&server);

        let (result, fragments) = run(&processor, Hooks::default(), &CancellationToken::new()).await;
        assert_eq!(result.unwrap(), Outcome::Completed);
        assert_eq!(fragments, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn test_progress_goes_to_side_channel() {
        let server = MockServer::start();
        server.enqueue(
            "POST",
            STREAM_PATH,
            MockResponse::sse(&[
                "event: progress",
                r#"data: {"message":{"type":"ProgressIndicator","message":"Looking it up"}}"#,
                r#"data: {"message":{"type":"TextChunk","message":"Done"}}"#,
            ]),
        );
        let processor = processor(&server);
        let progress = RecordingProgress::default();
        let hooks = Hooks {
            elicitor: None,
            progress: Some(&progress),
        };

        let (result, fragments) = run(&processor, hooks, &CancellationToken::new()).await;
        assert_eq!(result.unwrap(), Outcome::Completed);
        assert_eq!(fragments, vec!["Done"]);
        assert_eq!(progress.notices(), vec!["Looking it up"]);
    }

    #[tokio::test]
    async fn test_accepted_inquiry_continues_on_same_session() {
        let server = MockServer::start();
        server.enqueue(
            "POST",
            STREAM_PATH,
            MockResponse::sse(&[
                r#"data: {"message":{"type":"TextChunk","message":"Let me check."}}"#,
                r#"data: {"message":{"type":"Inquire","message":"Which city?"}}"#,
                r#"data: {"message":{"type":"TextChunk","message":"abandoned"}}"#,
            ]),
        );
        server.enqueue(
            "POST",
            STREAM_PATH,
            MockResponse::sse(&[r#"data: {"message":{"type":"TextChunk","message":"Sunny in Paris."}}"#]),
        );
        let processor = processor(&server);
        let elicitor = ScriptedElicitor::new([Elicitation::accept("Paris")]);
        let hooks = Hooks {
            elicitor: Some(&elicitor),
            progress: None,
        };

        let (result, fragments) = run(&processor, hooks, &CancellationToken::new()).await;
        assert_eq!(result.unwrap(), Outcome::Completed);
        assert_eq!(
            fragments,
            vec!["Let me check.", "\n\nParis\n\n", "Sunny in Paris."]
        );
        assert_eq!(elicitor.questions(), vec!["Which city?"]);

        let requests = server.requests_to("POST", STREAM_PATH);
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].json()["message"]["text"], "Paris");
    }

    #[tokio::test]
    async fn test_chained_inquiries_loop() {
        let server = MockServer::start();
        let inquire = r#"data: {"message":{"type":"Inquire","message":"More?"}}"#;
        server.enqueue("POST", STREAM_PATH, MockResponse::sse(&[inquire]));
        server.enqueue("POST", STREAM_PATH, MockResponse::sse(&[inquire]));
        server.enqueue(
            "POST",
            STREAM_PATH,
            MockResponse::sse(&[r#"data: {"message":{"type":"TextChunk","message":"end"}}"#]),
        );
        let processor = processor(&server);
        let elicitor =
            ScriptedElicitor::new([Elicitation::accept("a"), Elicitation::accept("b")]);
        let hooks = Hooks {
            elicitor: Some(&elicitor),
            progress: None,
        };

        let (result, fragments) = run(&processor, hooks, &CancellationToken::new()).await;
        assert_eq!(result.unwrap(), Outcome::Completed);
        assert_eq!(fragments, vec!["\n\na\n\n", "\n\nb\n\n", "end"]);
        assert_eq!(server.hits("POST", STREAM_PATH), 3);
    }

    #[tokio::test]
    async fn test_declined_inquiry_ends_quietly() {
        let server = MockServer::start();
        server.enqueue(
            "POST",
            STREAM_PATH,
            MockResponse::sse(&[
                r#"data: {"message":{"type":"TextChunk","message":"Before"}}"#,
                r#"data: {"message":{"type":"Inquire","message":"Which city?"}}"#,
                r#"data: {"message":{"type":"TextChunk","message":"After"}}"#,
            ]),
        );
        let processor = processor(&server);
        let elicitor = ScriptedElicitor::new([Elicitation::decline()]);
        let hooks = Hooks {
            elicitor: Some(&elicitor),
            progress: None,
        };

        let (result, fragments) = run(&processor, hooks, &CancellationToken::new()).await;
        assert_eq!(result.unwrap(), Outcome::Declined);
        assert_eq!(fragments, vec!["Before"]);
        assert_eq!(server.hits("POST", STREAM_PATH), 1);
    }

    #[tokio::test]
    async fn test_dismissed_inquiry_ends_quietly() {
        let server = MockServer::start();
        server.enqueue(
            "POST",
            STREAM_PATH,
            MockResponse::sse(&[r#"data: {"message":{"type":"Inquire","message":"?"}}"#]),
        );
        let processor = processor(&server);
        let elicitor = ScriptedElicitor::new([Elicitation::cancel()]);
        let hooks = Hooks {
            elicitor: Some(&elicitor),
            progress: None,
        };

        let (result, fragments) = run(&processor, hooks, &CancellationToken::new()).await;
        assert_eq!(result.unwrap(), Outcome::Dismissed);
        assert!(fragments.is_empty());
    }

    #[tokio::test]
    async fn test_inquiry_without_elicitor_is_skipped() {
        let server = MockServer::start();
        server.enqueue(
            "POST",
            STREAM_PATH,
            MockResponse::sse(&[
                r#"data: {"message":{"type":"Inquire","message":"Which city?"}}"#,
                r#"data: {"message":{"type":"TextChunk","message":"Anyway"}}"#,
            ]),
        );
        let processor = processor(&server);

        let (result, fragments) = run(&processor, Hooks::default(), &CancellationToken::new()).await;
        assert_eq!(result.unwrap(), Outcome::Completed);
        assert_eq!(fragments, vec!["Anyway"]);
    }

    #[tokio::test]
    async fn test_cancel_while_awaiting_answer() {
        let server = MockServer::start();
        server.enqueue(
            "POST",
            STREAM_PATH,
            MockResponse::sse(&[
                r#"data: {"message":{"type":"TextChunk","message":"Hmm"}}"#,
                r#"data: {"message":{"type":"Inquire","message":"Which city?"}}"#,
            ]),
        );
        let processor = processor(&server);
        let hooks = Hooks {
            elicitor: Some(&SilentElicitor),
            progress: None,
        };
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });

        let (result, fragments) = run(&processor, hooks, &cancel).await;
        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(fragments, vec!["Hmm"]);
    }

    #[tokio::test]
    async fn test_stream_open_failure_is_api_error() {
        let server = MockServer::start();
        server.enqueue(
            "POST",
            STREAM_PATH,
            MockResponse::text(500, "boom"),
        );
        let processor = processor(&server);

        let (result, fragments) = run(&processor, Hooks::default(), &CancellationToken::new()).await;
        assert_eq!(result.unwrap_err().status().map(|s| s.as_u16()), Some(500));
        assert!(fragments.is_empty());
    }

    #[tokio::test]
    async fn test_rejected_stream_open_refreshes_and_retries() {
        let server = MockServer::start();
        let processor = processor(&server);
        server.enqueue("POST", TOKEN_PATH, MockResponse::token("tok-2", 3600));
        server.enqueue("POST", STREAM_PATH, MockResponse::text(401, "expired"));
        server.enqueue(
            "POST",
            STREAM_PATH,
            MockResponse::sse(&[r#"data: {"message":{"type":"TextChunk","message":"after retry"}}"#]),
        );

        let (result, fragments) = run(&processor, Hooks::default(), &CancellationToken::new()).await;
        assert_eq!(result.unwrap(), Outcome::Completed);
        assert_eq!(fragments, vec!["after retry"]);

        let opens = server.requests_to("POST", STREAM_PATH);
        assert_eq!(opens.len(), 2);
        assert_eq!(opens[0].header("authorization"), Some("Bearer tok"));
        assert_eq!(opens[1].header("authorization"), Some("Bearer tok-2"));
        assert_eq!(server.hits("POST", TOKEN_PATH), 2);
    }

    #[tokio::test]
    async fn test_closed_receiver_stops_processing() {
        let server = MockServer::start();
        server.enqueue(
            "POST",
            STREAM_PATH,
            MockResponse::sse(&[r#"data: {"message":{"type":"TextChunk","message":"lost"}}"#]),
        );
        let processor = processor(&server);
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        let result = processor
            .send("sess-1", "Hello", Hooks::default(), &tx, &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[test]
    fn test_message_body_shape() {
        assert_eq!(
            message_body("hi"),
            json!({"message": {"sequenceId": 1, "type": "Text", "text": "hi"}})
        );
    }
}
