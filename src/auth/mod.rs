//! OAuth 2.0 client-credentials authentication.
//!
//! [`TokenManager`] owns the cached access token and is the only place it is
//! replaced. Refreshes are serialized behind one async lock, so callers racing
//! on a near-expiry token trigger a single network request.

mod client_credentials;
mod error;
mod token;

pub use client_credentials::ClientCredentials;
pub use error::AuthError;
pub use token::{DEFAULT_EXPIRES_IN, REFRESH_SKEW, Token};

use client_credentials::{request_token, token_http_client};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Caches the access token and refreshes it on demand.
pub struct TokenManager {
    client: reqwest::Client,
    credentials: ClientCredentials,
    cached: Mutex<Option<Token>>,
    refreshes: AtomicU64,
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("credentials", &self.credentials)
            .field("refreshes", &self.refreshes.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl TokenManager {
    #[must_use]
    pub fn with_timeout(credentials: ClientCredentials, timeout: Duration) -> Self {
        Self {
            client: token_http_client(timeout),
            credentials,
            cached: Mutex::new(None),
            refreshes: AtomicU64::new(0),
        }
    }

    /// Return the cached token while it is fresh, otherwise fetch a new one.
    pub async fn get_token(&self) -> Result<Token, AuthError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| t.is_valid()) {
            return Ok(token.clone());
        }
        self.refresh_locked(&mut cached).await
    }

    /// Unconditionally fetch a new token and replace the cached one.
    pub async fn fetch_new_token(&self) -> Result<Token, AuthError> {
        let mut cached = self.cached.lock().await;
        self.refresh_locked(&mut cached).await
    }

    /// Replace a token the server rejected with 401.
    ///
    /// If another caller already swapped `rejected` for a newer token while this
    /// one waited on the lock, that newer token is returned without a refresh.
    pub async fn refresh_rejected(&self, rejected: &Token) -> Result<Token, AuthError> {
        let mut cached = self.cached.lock().await;
        if let Some(current) = cached.as_ref()
            && current.value() != rejected.value()
            && current.is_valid()
        {
            debug!("Token already refreshed by a concurrent caller");
            return Ok(current.clone());
        }
        self.refresh_locked(&mut cached).await
    }

    /// Number of successful network refreshes since construction.
    #[must_use]
    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::Relaxed)
    }

    async fn refresh_locked(&self, cached: &mut Option<Token>) -> Result<Token, AuthError> {
        let token = request_token(&self.client, &self.credentials).await?;
        self.refreshes.fetch_add(1, Ordering::Relaxed);
        info!(
            expires_at = %token.expires_at(),
            "New access token acquired"
        );
        *cached = Some(token.clone());
        Ok(token)
    }
}
