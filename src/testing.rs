//! In-process HTTP server serving scripted responses to the clients under test.

use std::collections::{HashMap, VecDeque};
use std::io::Read;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::thread;
use tiny_http::{Header, Response, Server};

#[derive(Debug, Clone)]
pub struct MockResponse {
    pub status: u16,
    pub body: String,
    pub content_type: &'static str,
}

impl MockResponse {
    pub fn json(status: u16, body: &serde_json::Value) -> Self {
        Self {
            status,
            body: body.to_string(),
            content_type: "application/json",
        }
    }

    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            content_type: "text/plain",
        }
    }

    /// An event-stream body, one line per entry, each followed by a blank line.
    pub fn sse(lines: &[&str]) -> Self {
        let mut body = String::new();
        for line in lines {
            body.push_str(line);
            body.push_str("\n\n");
        }
        Self {
            status: 200,
            body,
            content_type: "text/event-stream",
        }
    }

    pub fn token(access_token: &str, expires_in: u64) -> Self {
        Self::json(
            200,
            &serde_json::json!({
                "access_token": access_token,
                "token_type": "Bearer",
                "expires_in": expires_in,
            }),
        )
    }
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).unwrap()
    }
}

type Routes = HashMap<(String, String), VecDeque<MockResponse>>;

/// Responses queued per `(method, path)`; the last queued response repeats.
pub struct MockServer {
    server: Arc<Server>,
    addr: SocketAddr,
    routes: Arc<Mutex<Routes>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockServer {
    pub fn start() -> Self {
        let server = Arc::new(Server::http("127.0.0.1:0").unwrap());
        let addr = server.server_addr().to_ip().unwrap();
        let routes: Arc<Mutex<Routes>> = Arc::default();
        let requests: Arc<Mutex<Vec<RecordedRequest>>> = Arc::default();

        let worker = Arc::clone(&server);
        let worker_routes = Arc::clone(&routes);
        let worker_requests = Arc::clone(&requests);
        thread::spawn(move || {
            for mut request in worker.incoming_requests() {
                let mut body = String::new();
                let _ = request.as_reader().read_to_string(&mut body);
                let method = request.method().to_string();
                let path = request.url().to_string();
                let headers = request
                    .headers()
                    .iter()
                    .map(|h| (h.field.to_string(), h.value.to_string()))
                    .collect();

                worker_requests.lock().unwrap().push(RecordedRequest {
                    method: method.clone(),
                    path: path.clone(),
                    headers,
                    body,
                });

                let scripted = {
                    let mut routes = worker_routes.lock().unwrap();
                    match routes.get_mut(&(method, path)) {
                        Some(queue) if queue.len() > 1 => queue.pop_front(),
                        Some(queue) => queue.front().cloned(),
                        None => None,
                    }
                };
                let scripted = scripted.unwrap_or_else(|| MockResponse::text(404, "no route"));

                let content_type =
                    Header::from_bytes(&b"Content-Type"[..], scripted.content_type.as_bytes())
                        .unwrap();
                let response = Response::from_string(scripted.body)
                    .with_status_code(scripted.status)
                    .with_header(content_type);
                let _ = request.respond(response);
            }
        });

        Self {
            server,
            addr,
            routes,
            requests,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn enqueue(&self, method: &str, path: &str, response: MockResponse) {
        self.routes
            .lock()
            .unwrap()
            .entry((method.to_string(), path.to_string()))
            .or_default()
            .push_back(response);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_to(&self, method: &str, path: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == method && r.path == path)
            .collect()
    }

    pub fn hits(&self, method: &str, path: &str) -> usize {
        self.requests_to(method, path).len()
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.server.unblock();
    }
}
