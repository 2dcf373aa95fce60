//! Authorization `state` codec.
//!
//! The state is base64url(JSON) of the session id generated at login plus an
//! optional post-login path. It is not signed: forgery protection comes from
//! comparing the embedded session id against the caller's own session cookie
//! when the provider redirects back.

use base64::{
    Engine as _,
    engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD},
};
use serde::{Deserialize, Serialize};

/// Reasons a `state` value cannot be decoded.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// Not base64url.
    #[error("state is not valid base64url")]
    Encoding(#[from] base64::DecodeError),

    /// Base64 decoded, but not the expected JSON object.
    #[error("state payload is not valid JSON: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Payload carried through the provider redirect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatePayload {
    /// Session id set as cookie when the login started
    pub session_id: String,
    /// Where to send the user once authenticated
    #[serde(default)]
    pub next: Option<String>,
}

impl StatePayload {
    /// Create a payload for `session_id`.
    pub fn new(session_id: impl Into<String>, next: Option<String>) -> Self {
        Self {
            session_id: session_id.into(),
            next,
        }
    }

    /// Encode into the opaque `state` query value.
    #[must_use]
    pub fn encode(&self) -> String {
        // Serializing two strings into JSON cannot fail
        let json = serde_json::to_vec(self).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    /// Decode a `state` query value.
    pub fn decode(state: &str) -> Result<Self, StateError> {
        let bytes = if state.ends_with('=') {
            URL_SAFE.decode(state)?
        } else {
            URL_SAFE_NO_PAD.decode(state)?
        };
        Ok(serde_json::from_slice(&bytes)?)
    }
}
