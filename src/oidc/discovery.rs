//! OIDC Discovery
//!
//! Loads the provider metadata document (OpenID Connect Discovery 1.0) that
//! advertises the endpoints the gateway talks to.

use reqwest::Client;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

use super::provider::{ProviderError, json_or_status};

/// OpenID Provider metadata.
///
/// The five endpoint fields are mandatory; everything else defaults to empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OidcConfiguration {
    /// Issuer identifier, matched against the `iss` claim
    pub issuer: String,

    /// Authorization endpoint URL
    pub authorization_endpoint: String,

    /// Token endpoint URL
    pub token_endpoint: String,

    /// Userinfo endpoint URL
    pub userinfo_endpoint: String,

    /// JSON Web Key Set URL
    pub jwks_uri: String,

    /// Device authorization endpoint (optional)
    #[serde(default)]
    pub device_authorization_endpoint: Option<String>,

    /// Token revocation endpoint (optional)
    #[serde(default)]
    pub revocation_endpoint: Option<String>,

    /// Supported response types
    #[serde(default)]
    pub response_types_supported: Vec<String>,

    /// Supported subject identifier types
    #[serde(default)]
    pub subject_types_supported: Vec<String>,

    /// Supported ID token signing algorithms
    #[serde(default)]
    pub id_token_signing_alg_values_supported: Vec<String>,

    /// Supported scopes (may be string or array due to implementation bugs)
    #[serde(default, deserialize_with = "deserialize_scopes")]
    pub scopes_supported: Vec<String>,

    /// Supported token endpoint auth methods
    #[serde(default)]
    pub token_endpoint_auth_methods_supported: Vec<String>,

    /// Supported claims
    #[serde(default)]
    pub claims_supported: Vec<String>,

    /// Supported PKCE code challenge methods
    #[serde(default)]
    pub code_challenge_methods_supported: Vec<String>,

    /// Supported grant types
    #[serde(default)]
    pub grant_types_supported: Vec<String>,
}

/// Deserialize scopes that may be either a string or array
fn deserialize_scopes<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrVec {
        String(String),
        Vec(Vec<String>),
    }

    match StringOrVec::deserialize(deserializer)? {
        StringOrVec::String(s) => Ok(s.split_whitespace().map(String::from).collect()),
        StringOrVec::Vec(v) => Ok(v),
    }
}

impl OidcConfiguration {
    /// Fetch the discovery document at `configuration_uri`.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is unreachable, answers with anything
    /// but `200 OK`, or lacks one of the mandatory endpoint fields.
    pub async fn discover(client: &Client, configuration_uri: &str) -> Result<Self, ProviderError> {
        debug!(url = %configuration_uri, "Fetching OIDC discovery document");

        let response = client
            .get(configuration_uri)
            .send()
            .await
            .map_err(|e| ProviderError::transport(configuration_uri, e))?;

        let configuration: Self = json_or_status(response).await?;

        debug!(
            issuer = %configuration.issuer,
            jwks_uri = %configuration.jwks_uri,
            "Discovered OIDC provider"
        );
        Ok(configuration)
    }

    /// Whether the provider advertises `alg` for ID token signatures.
    ///
    /// An empty advertisement is treated as "anything goes".
    #[must_use]
    pub fn supports_signing_alg(&self, alg: &str) -> bool {
        self.id_token_signing_alg_values_supported.is_empty()
            || self
                .id_token_signing_alg_values_supported
                .iter()
                .any(|a| a == alg)
    }
}
