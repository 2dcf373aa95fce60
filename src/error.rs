//! Error types for the Redovisa gateway

use std::io;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::oidc::{ProviderError, StateError, TokenError};
use crate::session::CacheError;

/// Result type alias for the gateway
pub type Result<T> = std::result::Result<T, Error>;

/// Gateway errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Identity provider metadata or keys could not be loaded at startup
    #[error("OIDC discovery failed: {0}")]
    Discovery(#[source] ProviderError),

    /// Identity provider rejected or garbled a runtime request
    #[error("Identity provider error: {0}")]
    Provider(#[from] ProviderError),

    /// The provider redirected back with an OAuth error instead of a code
    #[error("Authorization denied by provider: {0}")]
    AuthorizationDenied(String),

    /// A required callback query parameter is absent
    #[error("Authorization {0} missing")]
    MissingParameter(&'static str),

    /// The `state` parameter could not be decoded
    #[error("Invalid authorization state: {0}")]
    InvalidState(#[from] StateError),

    /// The state-bound session id does not match the session cookie
    #[error("Authorization state mismatch")]
    StateMismatch,

    /// The identity token failed verification
    #[error("Identity token rejected: {0}")]
    Token(#[from] TokenError),

    /// Session cache backend failure
    #[error("Session cache error: {0}")]
    Cache(#[from] CacheError),

    /// Allow-list file could not be read or parsed
    #[error("Allow-list error: {0}")]
    AllowList(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// HTTP status surfaced to the client for this error
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::AuthorizationDenied(_)
            | Self::MissingParameter(_)
            | Self::InvalidState(_)
            | Self::StateMismatch => StatusCode::BAD_REQUEST,
            Self::Token(_) => StatusCode::UNAUTHORIZED,
            Self::Provider(_) | Self::Discovery(_) => StatusCode::BAD_GATEWAY,
            Self::Config(_)
            | Self::Cache(_)
            | Self::AllowList(_)
            | Self::Io(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show to the client.
    ///
    /// Client-facing errors keep their own wording; everything else collapses
    /// to the canonical reason phrase so no provider or cache detail leaks.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::MissingParameter(_) | Self::StateMismatch => self.to_string(),
            Self::InvalidState(_) => "Invalid authorization state".to_string(),
            Self::AuthorizationDenied(_) => "Authorization denied".to_string(),
            Self::Token(_) => "Authentication failed".to_string(),
            _ => self
                .status_code()
                .canonical_reason()
                .unwrap_or("Error")
                .to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (
            status,
            Json(json!({
                "error": {
                    "status": status.as_u16(),
                    "message": self.public_message(),
                }
            })),
        )
            .into_response()
    }
}
