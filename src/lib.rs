//! Redovisa Gateway Library
//!
//! OpenID Connect authentication gateway that turns any axum application
//! into a protected resource.
//!
//! # Features
//!
//! - **Authorization-code flow**: login, callback and logout handled by a single middleware
//! - **Verified identity**: ID tokens checked against the provider's rotating key set
//! - **Server-side sessions**: Redis or in-memory cache behind one trait
//! - **Allow-list**: optional file of permitted emails, re-read on a TTL
//! - **Production Ready**: structured logging, request ids, graceful shutdown

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod app;
pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod oidc;
pub mod session;
pub mod users;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
///
/// # Errors
///
/// Returns [`Error::Config`] if a global subscriber is already installed.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| Error::Config(format!("Failed to initialize logging: {e}"))),
        _ => subscriber
            .with(fmt::layer())
            .try_init()
            .map_err(|e| Error::Config(format!("Failed to initialize logging: {e}"))),
    }
}
