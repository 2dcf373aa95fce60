//! Authorization code exchange
//!
//! Trades the code the provider hands back on the callback for tokens, and
//! turns those into identity claims either by verifying the ID token locally
//! or by asking the user-info endpoint.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::Claims;
use super::discovery::OidcConfiguration;
use super::keys::TokenVerifier;
use super::provider::{ProviderError, json_or_status};
use crate::Result;

/// Where identity claims come from after the code exchange.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimsSource {
    /// Verify the returned `id_token` locally (no extra round-trip)
    #[default]
    IdToken,
    /// Call the user-info endpoint with the access token
    Userinfo,
}

/// Token endpoint response
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    /// Access token (used for user-info)
    pub access_token: String,
    /// Token type, normally `Bearer`
    #[serde(default)]
    pub token_type: Option<String>,
    /// Lifetime of the access token in seconds
    #[serde(default)]
    pub expires_in: Option<u64>,
    /// Signed ID token
    #[serde(default)]
    pub id_token: Option<String>,
    /// Refresh token (unused; no refresh flow)
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Granted scope
    #[serde(default)]
    pub scope: Option<String>,
}

/// Client-credential holder that talks to the token and user-info endpoints.
pub struct TokenExchanger {
    http: Client,
    client_id: String,
    client_secret: String,
    token_endpoint: String,
    userinfo_endpoint: String,
}

impl std::fmt::Debug for TokenExchanger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenExchanger")
            .field("client_id", &self.client_id)
            .field("token_endpoint", &self.token_endpoint)
            .field("userinfo_endpoint", &self.userinfo_endpoint)
            .finish_non_exhaustive()
    }
}

impl TokenExchanger {
    /// Create an exchanger for the endpoints advertised in `configuration`.
    #[must_use]
    pub fn new(
        http: Client,
        configuration: &OidcConfiguration,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            http,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            token_endpoint: configuration.token_endpoint.clone(),
            userinfo_endpoint: configuration.userinfo_endpoint.clone(),
        }
    }

    /// Exchange an authorization code for tokens.
    ///
    /// The client authenticates with HTTP Basic `client_id:client_secret`.
    pub async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> std::result::Result<TokenResponse, ProviderError> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
        ];

        debug!(token_endpoint = %self.token_endpoint, "Get token");

        let response = self
            .http
            .post(&self.token_endpoint)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&params)
            .send()
            .await
            .map_err(|e| ProviderError::transport(&self.token_endpoint, e))?;

        json_or_status(response).await
    }

    /// Fetch claims from the user-info endpoint.
    pub async fn fetch_userinfo(
        &self,
        access_token: &str,
    ) -> std::result::Result<Claims, ProviderError> {
        debug!(userinfo_endpoint = %self.userinfo_endpoint, "Get user info");

        let response = self
            .http
            .get(&self.userinfo_endpoint)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| ProviderError::transport(&self.userinfo_endpoint, e))?;

        json_or_status(response).await
    }

    /// Exchange `code` and resolve the caller's identity claims.
    pub async fn authenticate(
        &self,
        code: &str,
        redirect_uri: &str,
        source: ClaimsSource,
        verifier: &dyn TokenVerifier,
    ) -> Result<Claims> {
        let token = self.exchange_code(code, redirect_uri).await?;
        debug!(
            token_type = token.token_type.as_deref().unwrap_or("unknown"),
            expires_in = ?token.expires_in,
            has_id_token = token.id_token.is_some(),
            "Received token"
        );

        match source {
            ClaimsSource::IdToken => {
                let id_token = token
                    .id_token
                    .as_deref()
                    .ok_or(ProviderError::MissingField("id_token"))?;
                Ok(verifier.verify(id_token).await?)
            }
            ClaimsSource::Userinfo => Ok(self.fetch_userinfo(&token.access_token).await?),
        }
    }
}
