//! Response handling shared by every call to the identity provider

use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::error;

/// Failure talking to the identity provider.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The provider answered with something other than `200 OK`.
    #[error("Status code {status} for {url}")]
    Status {
        /// HTTP status returned by the provider.
        status: u16,
        /// Request URL.
        url: String,
    },

    /// The request never produced a response (connect, TLS, timeout).
    #[error("Request to {url} failed: {source}")]
    Transport {
        /// Request URL.
        url: String,
        /// Underlying client error.
        #[source]
        source: reqwest::Error,
    },

    /// The body was not the JSON document we expected.
    #[error("Unable to decode response from {url}: {source}")]
    Decode {
        /// Request URL.
        url: String,
        /// Underlying decode error.
        #[source]
        source: reqwest::Error,
    },

    /// The token endpoint response lacks a field the selected flow needs.
    #[error("Token response is missing '{0}'")]
    MissingField(&'static str),
}

impl ProviderError {
    pub(crate) fn transport(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Transport {
            url: url.into(),
            source,
        }
    }
}

/// Decode a `200 OK` JSON response, failing on any other status.
pub(crate) async fn json_or_status<T: DeserializeOwned>(
    response: Response,
) -> Result<T, ProviderError> {
    let url = response.url().to_string();
    let status = response.status();

    if status != StatusCode::OK {
        error!(status = status.as_u16(), url = %url, "Identity provider returned non-200 status");
        return Err(ProviderError::Status {
            status: status.as_u16(),
            url,
        });
    }

    response.json::<T>().await.map_err(|source| {
        error!(url = %url, "Unable to decode identity provider response");
        ProviderError::Decode { url, source }
    })
}
