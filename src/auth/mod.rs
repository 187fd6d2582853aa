//! Bearer-token authorization seam.
//!
//! The interactive OAuth popup flow belongs to the embedding application;
//! this module only defines the trait the retrier and the remote clients
//! talk to, plus a refresh-token-grant implementation for silent renewal.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::AuthError;

/// Source of bearer tokens for remote calls.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Request authorization. A denial is a normal outcome, reported as
    /// `Ok(false)`, never as an error.
    ///
    /// `interactive` permits prompting the user; a silent request must not.
    async fn authorize(&self, interactive: bool) -> Result<bool, AuthError>;

    /// The current access token, if one is held.
    async fn bearer_token(&self) -> Option<String>;

    /// Recover from a reported token expiry: silent renewal first, then an
    /// interactive prompt as fallback. Returns whether a token was obtained.
    async fn reauthorize(&self) -> bool {
        match self.authorize(false).await {
            Ok(true) => {
                info!("auth token successfully refreshed");
                true
            }
            _ => matches!(self.authorize(true).await, Ok(true)),
        }
    }
}

/// Token provider performing the OAuth refresh-token grant against a
/// configured token endpoint. Interactive authorization is delegated to the
/// embedding application and always reported as denied here.
pub struct RefreshTokenProvider {
    client: Client,
    token_url: String,
    client_id: String,
    refresh_token: String,
    access: RwLock<Option<String>>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

impl RefreshTokenProvider {
    pub fn new(token_url: String, client_id: String, refresh_token: String) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("Failed to build reqwest client");

        Self {
            client,
            token_url,
            client_id,
            refresh_token,
            access: RwLock::new(None),
        }
    }

    /// Build from configuration; `None` when no token endpoint is configured.
    pub fn from_config(config: &Config, refresh_token: String) -> Option<Self> {
        let token_url = config.token_url.clone()?;
        let client_id = config.client_id.clone()?;
        Some(Self::new(token_url, client_id, refresh_token))
    }
}

#[async_trait]
impl TokenProvider for RefreshTokenProvider {
    async fn authorize(&self, interactive: bool) -> Result<bool, AuthError> {
        if interactive {
            warn!("interactive authorization must be handled by the embedding application");
            return Ok(false);
        }

        let response = self
            .client
            .post(&self.token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("client_id", self.client_id.as_str()),
                ("refresh_token", self.refresh_token.as_str()),
            ])
            .send()
            .await
            .map_err(|e| AuthError::Endpoint(e.to_string()))?;

        if !response.status().is_success() {
            // the authorization server said no, which is not a fault
            warn!(status = %response.status(), "token refresh was denied");
            return Ok(false);
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Endpoint(e.to_string()))?;

        *self.access.write().await = Some(token.access_token);
        Ok(true)
    }

    async fn bearer_token(&self) -> Option<String> {
        self.access.read().await.clone()
    }
}

/// Provider holding a fixed token, for demos and tests.
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into() }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn authorize(&self, _interactive: bool) -> Result<bool, AuthError> {
        Ok(true)
    }

    async fn bearer_token(&self) -> Option<String> {
        Some(self.token.clone())
    }
}
