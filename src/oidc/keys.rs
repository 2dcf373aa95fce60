//! ID token verification against the provider's JSON Web Key Set.
//!
//! # Verification flow
//!
//! 1. Decode the JWT header (no verification) to extract `kid` and `alg`.
//! 2. Resolve the decoding key by `kid` from the loaded JWKS. A token without
//!    `kid` is accepted only when the set holds exactly one usable key.
//! 3. On an unknown `kid`, refresh the JWKS once (rate-limited by the refresh
//!    cooldown) so provider key rotation is picked up without a restart.
//! 4. Verify the signature and the standard claims (`exp`, `iss`, `aud`),
//!    then reject tokens whose `iat` lies in the future.
//!
//! Clock leeway of 60 seconds tolerates minor skew between the provider and
//! the gateway host.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use jsonwebtoken::{
    Algorithm, DecodingKey, Validation,
    errors::ErrorKind,
    jwk::{AlgorithmParameters, JwkSet},
};
use parking_lot::RwLock;
use reqwest::Client;
use tracing::{debug, info, warn};

use super::Claims;
use super::discovery::OidcConfiguration;
use super::provider::{ProviderError, json_or_status};

/// Clock skew tolerated on time-based claims, in seconds.
const LEEWAY_SECS: u64 = 60;

/// Asymmetric algorithms ID tokens may be signed with.
const SIGNING_ALGORITHMS: [Algorithm; 8] = [
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::PS256,
    Algorithm::PS384,
    Algorithm::PS512,
    Algorithm::ES256,
    Algorithm::ES384,
];

/// Error variants for ID token verification failures.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    /// The token is not a well-formed compact JWT.
    #[error("malformed token: {0}")]
    Malformed(#[source] jsonwebtoken::errors::Error),

    /// The JWT header has no `kid` and the key set is ambiguous.
    #[error("JWT missing 'kid' field in header")]
    MissingKeyId,

    /// The `kid` in the JWT header is not in the provider's JWKS.
    #[error("unknown key ID: {0}")]
    UnknownKeyId(String),

    /// The header algorithm is not one we verify ID tokens with.
    #[error("unsupported signing algorithm: {0:?}")]
    UnsupportedAlgorithm(Algorithm),

    /// Signature does not match the resolved key.
    #[error("invalid token signature")]
    InvalidSignature,

    /// `exp` is in the past.
    #[error("token expired")]
    Expired,

    /// `iat` is in the future.
    #[error("token issued in the future")]
    IssuedInFuture,

    /// Issuer, audience or another registered claim failed validation.
    #[error("invalid token claims: {0}")]
    InvalidClaims(#[source] jsonwebtoken::errors::Error),

    /// A claim the gateway relies on is absent.
    #[error("token is missing the '{0}' claim")]
    MissingClaim(&'static str),

    /// Refreshing the key set after an unknown `kid` failed.
    #[error("key set refresh failed: {0}")]
    KeyRefresh(#[source] ProviderError),
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::ExpiredSignature => Self::Expired,
            ErrorKind::InvalidSignature => Self::InvalidSignature,
            ErrorKind::InvalidIssuer
            | ErrorKind::InvalidAudience
            | ErrorKind::InvalidSubject
            | ErrorKind::ImmatureSignature
            | ErrorKind::MissingRequiredClaim(_) => Self::InvalidClaims(err),
            _ => Self::Malformed(err),
        }
    }
}

/// Capability to turn a compact ID token into verified claims.
///
/// The gate only depends on this trait, so the signature library can change
/// without touching request handling.
#[async_trait]
pub trait TokenVerifier: Send + Sync + 'static {
    /// Verify `token` and return its claims.
    async fn verify(&self, token: &str) -> Result<Claims, TokenError>;
}

/// Loaded key set.
struct CachedJwks {
    keys: JwkSet,
    fetched_at: Instant,
}

/// JWKS-backed verifier scoped to a single issuer and audience.
pub struct JwksVerifier {
    issuer: String,
    audience: String,
    jwks_uri: String,
    http: Client,
    jwks: RwLock<CachedJwks>,
    /// Minimum time between two refreshes triggered by unknown key ids.
    refresh_cooldown: Duration,
    /// Algorithms accepted in the JWT header.
    algorithms: Vec<Algorithm>,
}

impl JwksVerifier {
    /// Fetch the key set advertised by `configuration` and build a verifier.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] if the JWKS cannot be fetched or decoded.
    pub async fn load(
        http: Client,
        configuration: &OidcConfiguration,
        audience: impl Into<String>,
        refresh_cooldown: Duration,
    ) -> Result<Self, ProviderError> {
        let keys = fetch_jwks(&http, &configuration.jwks_uri).await?;

        info!(
            key_count = keys.keys.len(),
            oidc_issuer = %configuration.issuer,
            oidc_jwks_uri = %configuration.jwks_uri,
            "Read issuer keys"
        );

        let algorithms: Vec<Algorithm> = SIGNING_ALGORITHMS
            .into_iter()
            .filter(|alg| configuration.supports_signing_alg(&format!("{alg:?}")))
            .collect();
        if algorithms.is_empty() {
            warn!(
                advertised = ?configuration.id_token_signing_alg_values_supported,
                "Provider advertises no ID token algorithm we can verify"
            );
        }

        let mut verifier = Self::from_jwks(
            http,
            &configuration.issuer,
            &configuration.jwks_uri,
            audience,
            keys,
            refresh_cooldown,
        );
        verifier.algorithms = algorithms;
        Ok(verifier)
    }

    /// Build a verifier around an already loaded key set.
    pub fn from_jwks(
        http: Client,
        issuer: &str,
        jwks_uri: &str,
        audience: impl Into<String>,
        keys: JwkSet,
        refresh_cooldown: Duration,
    ) -> Self {
        Self {
            issuer: issuer.to_string(),
            audience: audience.into(),
            jwks_uri: jwks_uri.to_string(),
            http,
            jwks: RwLock::new(CachedJwks {
                keys,
                fetched_at: Instant::now(),
            }),
            refresh_cooldown,
            algorithms: SIGNING_ALGORITHMS.to_vec(),
        }
    }

    /// Issuer tokens must carry.
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Key ids currently loaded.
    pub fn key_ids(&self) -> Vec<String> {
        self.jwks
            .read()
            .keys
            .keys
            .iter()
            .filter_map(|k| k.common.key_id.clone())
            .collect()
    }

    /// Re-fetch the key set, replacing the loaded one. Returns the key count.
    pub async fn refresh(&self) -> Result<usize, ProviderError> {
        let keys = fetch_jwks(&self.http, &self.jwks_uri).await?;
        let count = keys.keys.len();

        *self.jwks.write() = CachedJwks {
            keys,
            fetched_at: Instant::now(),
        };

        debug!(key_count = count, oidc_jwks_uri = %self.jwks_uri, "Refreshed issuer keys");
        Ok(count)
    }

    /// Find a decoding key, refreshing the key set once for an unknown `kid`.
    async fn resolve_key(&self, kid: Option<&str>) -> Result<DecodingKey, TokenError> {
        if let Some(key) = self.lookup(kid)? {
            return Ok(key);
        }

        let stale = self.jwks.read().fetched_at.elapsed() >= self.refresh_cooldown;
        if stale {
            debug!(kid = ?kid, "Key not found in loaded JWKS, refreshing");
            self.refresh().await.map_err(TokenError::KeyRefresh)?;
            if let Some(key) = self.lookup(kid)? {
                return Ok(key);
            }
        }

        Err(kid.map_or(TokenError::MissingKeyId, |k| {
            TokenError::UnknownKeyId(k.to_string())
        }))
    }

    fn lookup(&self, kid: Option<&str>) -> Result<Option<DecodingKey>, TokenError> {
        let jwks = self.jwks.read();
        match kid {
            Some(kid) => Ok(find_key_in_jwks(&jwks.keys, kid)),
            None => match jwks.keys.keys.as_slice() {
                [only] => Ok(decoding_key(&only.algorithm)),
                [] => Ok(None),
                _ => Err(TokenError::MissingKeyId),
            },
        }
    }

    fn validation(&self, alg: Algorithm) -> Result<Validation, TokenError> {
        if !self.algorithms.contains(&alg) {
            warn!(alg = ?alg, "Rejecting ID token with unsupported algorithm");
            return Err(TokenError::UnsupportedAlgorithm(alg));
        }

        let mut v = Validation::new(alg);
        v.leeway = LEEWAY_SECS;
        v.set_issuer(&[self.issuer.as_str()]);
        v.set_audience(&[self.audience.as_str()]);
        Ok(v)
    }
}

#[async_trait]
impl TokenVerifier for JwksVerifier {
    async fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        let header = jsonwebtoken::decode_header(token).map_err(TokenError::Malformed)?;
        let validation = self.validation(header.alg)?;
        let key = self.resolve_key(header.kid.as_deref()).await?;

        let claims = jsonwebtoken::decode::<Claims>(token, &key, &validation)?.claims;

        if let Some(iat) = claims.get("iat").and_then(serde_json::Value::as_u64) {
            let now = chrono::Utc::now().timestamp().max(0).unsigned_abs();
            if iat > now + LEEWAY_SECS {
                return Err(TokenError::IssuedInFuture);
            }
        }

        Ok(claims)
    }
}

async fn fetch_jwks(http: &Client, jwks_uri: &str) -> Result<JwkSet, ProviderError> {
    debug!("Fetching JWKS from {jwks_uri}");
    let response = http
        .get(jwks_uri)
        .send()
        .await
        .map_err(|e| ProviderError::transport(jwks_uri, e))?;
    json_or_status(response).await
}

/// Find a JWK by `kid` in a `JwkSet` and convert it to a `DecodingKey`.
fn find_key_in_jwks(jwks: &JwkSet, kid: &str) -> Option<DecodingKey> {
    jwks.keys
        .iter()
        .find(|jwk| jwk.common.key_id.as_deref() == Some(kid))
        .and_then(|jwk| decoding_key(&jwk.algorithm))
}

fn decoding_key(params: &AlgorithmParameters) -> Option<DecodingKey> {
    match params {
        AlgorithmParameters::RSA(rsa) => DecodingKey::from_rsa_components(&rsa.n, &rsa.e).ok(),
        AlgorithmParameters::EllipticCurve(ec) => {
            DecodingKey::from_ec_components(&ec.x, &ec.y).ok()
        }
        // Symmetric keys are never published by a provider for ID tokens
        AlgorithmParameters::OctetKey(_) | AlgorithmParameters::OctetKeyPair(_) => None,
    }
}
