//! Composition root. Builds the shared service objects once from settings.

use crate::auth::{Token, TokenManager};
use crate::config::Settings;
use crate::conversation::Conversation;
use crate::error::Error;
use crate::session::SessionController;
use crate::transport::AuthenticatedTransport;
use std::sync::Arc;
use tracing::info;

pub struct Bridge {
    tokens: Arc<TokenManager>,
    conversation: Conversation,
}

impl Bridge {
    pub fn new(settings: &Settings) -> Self {
        let tokens = Arc::new(TokenManager::with_timeout(
            settings.credentials.clone(),
            settings.token_timeout,
        ));
        let transport = Arc::new(AuthenticatedTransport::with_connect_timeout(
            settings.api_base_url.clone(),
            Arc::clone(&tokens),
            settings.connect_timeout,
        ));
        let sessions = Arc::new(SessionController::new(
            transport,
            settings.agent_id.clone(),
            settings.instance_endpoint.clone(),
        ));
        let conversation = Conversation::new(sessions);

        info!(
            agent_id = %settings.agent_id,
            api = %settings.api_base_url,
            "Bridge initialized"
        );
        Self {
            tokens,
            conversation,
        }
    }

    /// Fetch a token now, so bad credentials fail before any query is served.
    pub async fn authenticate(&self) -> Result<Token, Error> {
        Ok(self.tokens.fetch_new_token().await?)
    }

    pub fn tokens(&self) -> &Arc<TokenManager> {
        &self.tokens
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }
}
