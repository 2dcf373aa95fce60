//! OpenID Connect client side of the gateway
//!
//! Everything the gateway needs to talk to its identity provider:
//! - Discovery document loading (`.well-known/openid-configuration`)
//! - JWKS-backed ID token verification behind the [`TokenVerifier`] seam
//! - The opaque `state` codec that binds a callback to its login request
//! - Authorization-code exchange and user-info lookup

mod discovery;
mod exchange;
mod keys;
mod provider;
mod state;

pub use discovery::OidcConfiguration;
pub use exchange::{ClaimsSource, TokenExchanger, TokenResponse};
pub use keys::{JwksVerifier, TokenError, TokenVerifier};
pub use provider::ProviderError;
pub use state::{StateError, StatePayload};

/// Decoded claims of an ID token or user-info response, in document order.
pub type Claims = serde_json::Map<String, serde_json::Value>;

/// Scopes requested when none are configured.
pub const DEFAULT_SCOPES: [&str; 3] = ["openid", "email", "profile"];
