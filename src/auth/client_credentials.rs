//! OAuth 2.0 client-credentials grant.

use super::error::AuthError;
use super::token::{DEFAULT_EXPIRES_IN, Token};
use chrono::Utc;
use reqwest::header::{ACCEPT, HeaderValue};
use serde::Deserialize;
use std::time::Duration;

/// Connected-app credentials and the endpoint that exchanges them.
#[derive(Clone)]
pub struct ClientCredentials {
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
}

impl std::fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .finish()
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<u64>,
}

/// Build the HTTP client used for token requests.
pub(crate) fn token_http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// Exchange the client id and secret for a fresh access token.
pub(crate) async fn request_token(
    client: &reqwest::Client,
    credentials: &ClientCredentials,
) -> Result<Token, AuthError> {
    let response = client
        .post(&credentials.token_url)
        .header(ACCEPT, HeaderValue::from_static("application/json"))
        .form(&[
            ("grant_type", "client_credentials"),
            ("client_id", credentials.client_id.as_str()),
            ("client_secret", credentials.client_secret.as_str()),
        ])
        .send()
        .await?;

    let status = response.status();
    let text = response.text().await?;

    if !status.is_success() {
        return Err(AuthError::Rejected { status, body: text });
    }

    let parsed: TokenResponse =
        serde_json::from_str(&text).map_err(|e| AuthError::Malformed(e.to_string()))?;
    let expires_in = parsed.expires_in.unwrap_or(DEFAULT_EXPIRES_IN);

    Ok(Token::issued(parsed.access_token, Utc::now(), expires_in))
}
