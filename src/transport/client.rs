//! Bearer-authenticated HTTP client for the agent API.

use crate::auth::{Token, TokenManager};
use crate::error::Error;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{Method, Response, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Connection timeout. Agent responses themselves are not time-bounded.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Issues agent API requests with a bearer token from [`TokenManager`].
///
/// A 401 answer triggers one forced token refresh and one retry; any other
/// non-2xx answer, or a second 401, is returned as [`Error::Api`].
#[derive(Debug)]
pub struct AuthenticatedTransport {
    client: reqwest::Client,
    base_url: String,
    tokens: Arc<TokenManager>,
}

impl AuthenticatedTransport {
    pub fn new(base_url: impl Into<String>, tokens: Arc<TokenManager>) -> Self {
        Self::with_connect_timeout(base_url, tokens, CONNECT_TIMEOUT)
    }

    pub fn with_connect_timeout(
        base_url: impl Into<String>,
        tokens: Arc<TokenManager>,
        connect_timeout: Duration,
    ) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            tokens,
        }
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[must_use]
    pub fn tokens(&self) -> &Arc<TokenManager> {
        &self.tokens
    }

    /// Send an authenticated request and return the successful response.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        extra_headers: HeaderMap,
    ) -> Result<Response, Error> {
        let token = self.tokens.get_token().await?;
        let mut response = self
            .send(&method, path, body, &extra_headers, &token)
            .await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            warn!(%method, path, "Token rejected (401), refreshing and retrying once");
            let token = self.tokens.refresh_rejected(&token).await?;
            response = self
                .send(&method, path, body, &extra_headers, &token)
                .await?;
        }

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api { status, body });
        }

        Ok(response)
    }

    /// POST a JSON body and parse the JSON answer.
    pub async fn post_json(&self, path: &str, body: &Value) -> Result<Value, Error> {
        let response = self
            .request(Method::POST, path, Some(body), HeaderMap::new())
            .await?;
        let text = response.text().await?;
        serde_json::from_str(&text)
            .map_err(|e| Error::Decode(format!("Failed to parse response: {e}\nBody: {text}")))
    }

    /// POST a JSON body and return the still-unread event stream.
    ///
    /// The 401 retry still applies here: the status line arrives before any
    /// event is read, so nothing has been consumed when the retry happens.
    pub async fn post_stream(&self, path: &str, body: &Value) -> Result<Response, Error> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
        self.request(Method::POST, path, Some(body), headers).await
    }

    /// Merge the bearer header into the caller's headers.
    fn build_headers(token: &Token, extra: &HeaderMap) -> Result<HeaderMap, Error> {
        let mut headers = extra.clone();
        let value = HeaderValue::from_str(&token.bearer()).map_err(|_| {
            Error::Decode("Access token contains invalid header characters".into())
        })?;
        headers.insert(AUTHORIZATION, value);
        Ok(headers)
    }

    async fn send(
        &self,
        method: &Method,
        path: &str,
        body: Option<&Value>,
        extra: &HeaderMap,
        token: &Token,
    ) -> Result<Response, Error> {
        let url = format!("{}{path}", self.base_url);
        let headers = Self::build_headers(token, extra)?;
        debug!(%method, %url, "Agent API request");

        let mut builder = self.client.request(method.clone(), &url).headers(headers);
        if let Some(body) = body {
            builder = builder.json(body);
        }
        Ok(builder.send().await?)
    }
}
