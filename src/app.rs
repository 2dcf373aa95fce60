//! Placeholder application served behind the gate by the binary
//!
//! Stands in for the real downstream application so the gateway can be run
//! and exercised on its own.

use axum::{Json, Router, http::StatusCode, response::IntoResponse, routing::get};
use serde_json::json;

use crate::gateway::{CurrentSession, RequiredSession};
use crate::{Error, Result};

const OWN_ROUTES: [&str; 3] = ["/", "/whoami", "/health"];

/// Router with `/`, the forbidden page, `/whoami` and `/health`.
///
/// # Errors
///
/// Returns [`Error::Config`] if `forbidden_path` is one of the other routes.
pub fn placeholder_router(forbidden_path: &str) -> Result<Router> {
    if OWN_ROUTES.contains(&forbidden_path) {
        return Err(Error::Config(format!(
            "paths.forbidden cannot be {forbidden_path}, it is served by the placeholder app"
        )));
    }

    Ok(Router::new()
        .route("/", get(index))
        .route(forbidden_path, get(forbidden))
        .route("/whoami", get(whoami))
        .route("/health", get(health)))
}

async fn index(CurrentSession(session): CurrentSession) -> impl IntoResponse {
    match session {
        Some(session) => format!("Signed in as {}\n", session.email),
        None => "Not signed in\n".to_string(),
    }
}

async fn forbidden() -> impl IntoResponse {
    (
        StatusCode::FORBIDDEN,
        "You are not allowed to use this service\n",
    )
}

async fn whoami(RequiredSession(session): RequiredSession) -> impl IntoResponse {
    Json(json!({
        "session_id": session.session_id,
        "issuer": session.issuer,
        "sub": session.subject,
        "email": session.email,
        "name": session.display_name,
        "expires_at": session.expires_at,
    }))
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}
