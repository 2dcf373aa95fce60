//! Authentication gate
//!
//! Middleware that sits in front of the protected application and drives
//! the authorization-code flow:
//! - `login` starts the flow: fresh session id cookie, redirect to the provider
//! - `callback` validates `state`, exchanges the code and commits the session
//! - `logout` drops the session and its cookie
//! - every other path resolves the session from the cookie and either
//!   forwards the request or redirects to login
//!
//! The resolved session is attached to the request as [`CurrentSession`].

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json,
    body::Body,
    extract::{FromRequestParts, State},
    http::{HeaderValue, Request, StatusCode, Uri, header::LOCATION, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::Deserialize;
use serde_json::json;
use subtle::ConstantTimeEq;
use time::OffsetDateTime;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use super::paths::PathMatcher;
use crate::config::Config;
use crate::oidc::{
    Claims, ClaimsSource, OidcConfiguration, StatePayload, TokenError, TokenExchanger,
    TokenVerifier,
};
use crate::session::{Session, SessionStore, unix_now};
use crate::users::AllowList;
use crate::{Error, Result};

/// Settings the gate needs from configuration, resolved once.
#[derive(Debug, Clone)]
pub struct GateSettings {
    /// Session cookie name
    pub cookie_name: String,
    /// Set `Secure` on the cookie
    pub cookie_secure: bool,
    /// Optional cookie `Domain`
    pub cookie_domain: Option<String>,
    /// Path that starts the flow
    pub login_path: String,
    /// Path that ends the session
    pub logout_path: String,
    /// Path the provider redirects back to
    pub callback_path: String,
    /// Landing page for users rejected by the allow-list
    pub forbidden_path: String,
    /// Absolute callback URI sent as `redirect_uri`
    pub callback_uri: String,
    /// Landing page when login carried no `next`
    pub login_redirect_uri: String,
    /// Landing page after logout
    pub logout_redirect_uri: String,
    /// OAuth client id
    pub client_id: String,
    /// Space separated scopes
    pub scope: String,
    /// Lifetime of the pre-login cookie
    pub auth_ttl: Duration,
    /// Session lifetime when the token has no `exp`
    pub session_ttl: Duration,
    /// Where claims come from after the code exchange
    pub claims_source: ClaimsSource,
}

impl GateSettings {
    /// Resolve settings from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the callback URI cannot be built.
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            cookie_name: config.cookie.name.clone(),
            cookie_secure: config.cookie.secure,
            cookie_domain: config.cookie.domain.clone(),
            login_path: config.paths.login.clone(),
            logout_path: config.paths.logout.clone(),
            callback_path: config.paths.callback.clone(),
            forbidden_path: config.paths.forbidden.clone(),
            callback_uri: config.callback_uri()?,
            login_redirect_uri: config.login_redirect_uri().to_string(),
            logout_redirect_uri: config.logout_redirect_uri().to_string(),
            client_id: config.oidc.client_id.clone(),
            scope: config.oidc.scopes.join(" "),
            auth_ttl: config.oidc.auth_ttl,
            session_ttl: config.oidc.session_ttl,
            claims_source: config.oidc.claims_source(),
        })
    }
}

/// The session resolved for a request, `None` on excluded paths without one.
#[derive(Debug, Clone, Default)]
pub struct CurrentSession(pub Option<Session>);

impl<S: Send + Sync> FromRequestParts<S> for CurrentSession {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<CurrentSession>()
            .cloned()
            .unwrap_or_default())
    }
}

/// A session that must exist; rejects with 401 otherwise.
#[derive(Debug, Clone)]
pub struct RequiredSession(pub Session);

impl<S: Send + Sync> FromRequestParts<S> for RequiredSession {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        match parts.extensions.get::<CurrentSession>() {
            Some(CurrentSession(Some(session))) => Ok(Self(session.clone())),
            _ => Err((
                StatusCode::UNAUTHORIZED,
                Json(json!({
                    "error": {
                        "status": StatusCode::UNAUTHORIZED.as_u16(),
                        "message": "Authentication required",
                    }
                })),
            )
                .into_response()),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct LoginQuery {
    next: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// Request-dispatch state shared by all requests.
pub struct AuthGate {
    settings: GateSettings,
    issuer: String,
    authorization_endpoint: Url,
    exchanger: TokenExchanger,
    verifier: Arc<dyn TokenVerifier>,
    sessions: SessionStore,
    users: Option<Arc<AllowList>>,
    excluded: PathMatcher,
}

impl std::fmt::Debug for AuthGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthGate")
            .field("settings", &self.settings)
            .field("issuer", &self.issuer)
            .field("authorization_endpoint", &self.authorization_endpoint.as_str())
            .field("users", &self.users)
            .finish_non_exhaustive()
    }
}

impl AuthGate {
    /// Assemble a gate from its collaborators.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the provider's authorization endpoint is
    /// not a URL.
    pub fn new(
        settings: GateSettings,
        configuration: &OidcConfiguration,
        exchanger: TokenExchanger,
        verifier: Arc<dyn TokenVerifier>,
        sessions: SessionStore,
        users: Option<Arc<AllowList>>,
        excluded: PathMatcher,
    ) -> Result<Self> {
        let authorization_endpoint = Url::parse(&configuration.authorization_endpoint)
            .map_err(|e| Error::Config(format!("authorization_endpoint: {e}")))?;

        Ok(Self {
            settings,
            issuer: configuration.issuer.clone(),
            authorization_endpoint,
            exchanger,
            verifier,
            sessions,
            users,
            excluded,
        })
    }

    /// Provider authorization URL for `state`.
    pub fn authorization_url(&self, state: &str) -> String {
        let mut url = self.authorization_endpoint.clone();
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("scope", &self.settings.scope)
            .append_pair("client_id", &self.settings.client_id)
            .append_pair("redirect_uri", &self.settings.callback_uri)
            .append_pair("state", state);
        url.into()
    }

    /// Start the flow: new session id cookie and redirect to the provider.
    fn login(&self, jar: CookieJar, next: Option<String>) -> Response {
        let session_id = Uuid::new_v4().to_string();
        let state = StatePayload::new(session_id.clone(), next).encode();

        debug!(session_id = %session_id, "Redirecting to identity provider");

        let mut cookie = self.cookie(session_id);
        cookie.set_max_age(time::Duration::seconds(duration_secs(self.settings.auth_ttl)));

        (jar.add(cookie), found(&self.authorization_url(&state))).into_response()
    }

    /// Drop the session (if any) and clear the cookie.
    async fn logout(&self, jar: CookieJar) -> Result<Response> {
        let jar = match jar.get(&self.settings.cookie_name) {
            Some(cookie) => {
                let session_id = cookie.value().to_string();
                self.sessions.remove(&session_id).await?;
                info!(session_id = %session_id, "Removed session");
                jar.add(self.cleared_cookie())
            }
            None => jar,
        };

        Ok((jar, found(&self.settings.logout_redirect_uri)).into_response())
    }

    /// Handle the provider redirect.
    ///
    /// Each check runs only once the previous one passed.
    async fn callback(&self, jar: CookieJar, uri: &Uri) -> Result<Response> {
        let query: CallbackQuery =
            serde_urlencoded::from_str(uri.query().unwrap_or_default()).unwrap_or_default();

        if let Some(error) = query.error {
            warn!(
                error = %error,
                description = query.error_description.as_deref().unwrap_or_default(),
                "Identity provider returned an error"
            );
            return Err(Error::AuthorizationDenied(error));
        }

        let code = query
            .code
            .filter(|c| !c.is_empty())
            .ok_or(Error::MissingParameter("code"))?;
        let state = query
            .state
            .filter(|s| !s.is_empty())
            .ok_or(Error::MissingParameter("state"))?;

        let payload = StatePayload::decode(&state)?;

        let cookie_matches = jar
            .get(&self.settings.cookie_name)
            .is_some_and(|c| bool::from(c.value().as_bytes().ct_eq(payload.session_id.as_bytes())));
        if !cookie_matches {
            warn!(session_id = %payload.session_id, "Authorization state mismatch");
            return Err(Error::StateMismatch);
        }

        let claims = self
            .exchanger
            .authenticate(
                &code,
                &self.settings.callback_uri,
                self.settings.claims_source,
                self.verifier.as_ref(),
            )
            .await?;

        let session = self.session_from_claims(payload.session_id, claims)?;

        if let Some(users) = &self.users {
            if !users.contains(&session.email).await? {
                warn!(email = %session.email, sub = %session.subject, "User forbidden");
                return Ok((
                    jar.add(self.cleared_cookie()),
                    found(&self.settings.forbidden_path),
                )
                    .into_response());
            }
        }

        let expires = OffsetDateTime::from_unix_timestamp(session.expires_at)
            .map_err(|e| Error::Internal(format!("session expiry out of range: {e}")))?;

        self.sessions.save(&session).await?;

        info!(
            session_id = %session.session_id,
            sub = %session.subject,
            email = %session.email,
            "Created session"
        );

        let mut cookie = self.cookie(session.session_id);
        cookie.set_expires(expires);

        let target = payload
            .next
            .as_deref()
            .and_then(safe_next)
            .unwrap_or(self.settings.login_redirect_uri.as_str())
            .to_string();

        Ok((jar.add(cookie), found(&target)).into_response())
    }

    fn session_from_claims(
        &self,
        session_id: String,
        claims: Claims,
    ) -> std::result::Result<Session, TokenError> {
        let text = |name: &str| claims.get(name).and_then(serde_json::Value::as_str);

        let subject = text("sub").ok_or(TokenError::MissingClaim("sub"))?.to_string();
        let email = text("email")
            .ok_or(TokenError::MissingClaim("email"))?
            .to_string();
        // User-info responses carry no `iss`
        let issuer = text("iss").unwrap_or(self.issuer.as_str()).to_string();
        let display_name = display_name(&claims);

        let expires_at = claims.get("exp").and_then(numeric_date).unwrap_or_else(|| {
            unix_now().saturating_add(duration_secs(self.settings.session_ttl))
        });

        Ok(Session {
            session_id,
            issuer,
            subject,
            email,
            display_name,
            claims,
            expires_at,
        })
    }

    /// Session for the request's cookie, if any.
    async fn resolve_session(&self, jar: &CookieJar) -> Result<Option<Session>> {
        match jar.get(&self.settings.cookie_name) {
            Some(cookie) if !cookie.value().is_empty() => {
                Ok(self.sessions.load(cookie.value()).await?)
            }
            _ => Ok(None),
        }
    }

    fn cookie(&self, value: String) -> Cookie<'static> {
        let mut builder = Cookie::build((self.settings.cookie_name.clone(), value))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .secure(self.settings.cookie_secure);
        if let Some(domain) = &self.settings.cookie_domain {
            builder = builder.domain(domain.clone());
        }
        builder.build()
    }

    fn cleared_cookie(&self) -> Cookie<'static> {
        let mut cookie = self.cookie(String::new());
        cookie.set_max_age(time::Duration::ZERO);
        cookie
    }
}

/// Authentication middleware
pub async fn auth_gate(
    State(gate): State<Arc<AuthGate>>,
    jar: CookieJar,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    let settings = &gate.settings;

    if path == settings.callback_path {
        return gate
            .callback(jar, request.uri())
            .await
            .unwrap_or_else(|e| failure(&path, e));
    }

    if path == settings.login_path {
        let query: LoginQuery =
            serde_urlencoded::from_str(request.uri().query().unwrap_or_default())
                .unwrap_or_default();
        let next = query.next.as_deref().and_then(safe_next).map(str::to_string);
        return gate.login(jar, next);
    }

    if path == settings.logout_path {
        return gate
            .logout(jar)
            .await
            .unwrap_or_else(|e| failure(&path, e));
    }

    let session = match gate.resolve_session(&jar).await {
        Ok(session) => session,
        Err(e) => return failure(&path, e),
    };

    if gate.excluded.matches(&path) {
        debug!(path = %path, "Path excluded");
    } else {
        let Some(session) = &session else {
            info!(path = %path, "No session found, redirect to login");
            let next = request
                .uri()
                .path_and_query()
                .map_or_else(|| path.clone(), ToString::to_string);
            return gate.login(jar, Some(next));
        };
        debug!(
            path = %path,
            session_id = %session.session_id,
            sub = %session.subject,
            email = %session.email,
            "Found session"
        );
    }

    request.extensions_mut().insert(CurrentSession(session));
    next.run(request).await
}

fn failure(path: &str, error: Error) -> Response {
    let status = error.status_code();
    if status.is_server_error() {
        tracing::error!(path = %path, error = %error, "Authentication request failed");
    } else {
        warn!(path = %path, error = %error, "Authentication request rejected");
    }
    error.into_response()
}

/// `302 Found` to `location`.
fn found(location: &str) -> Response {
    match HeaderValue::from_str(location) {
        Ok(value) => (StatusCode::FOUND, [(LOCATION, value)]).into_response(),
        Err(_) => Error::Internal(format!("invalid redirect target: {location}")).into_response(),
    }
}

/// Accept only local absolute paths as post-login targets.
fn safe_next(next: &str) -> Option<&str> {
    let local = next.starts_with('/')
        && !next.starts_with("//")
        && !next.contains('\\')
        && !next.chars().any(char::is_control);
    local.then_some(next)
}

/// `given_name family_name` when both are present, else `name`.
fn display_name(claims: &Claims) -> String {
    let text = |name: &str| claims.get(name).and_then(serde_json::Value::as_str);
    match (text("given_name"), text("family_name")) {
        (Some(given), Some(family)) => format!("{given} {family}"),
        _ => text("name").unwrap_or_default().to_string(),
    }
}

/// Seconds of a JSON NumericDate, fractions truncated.
#[allow(clippy::cast_possible_truncation)]
fn numeric_date(value: &serde_json::Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64))
}

fn duration_secs(d: Duration) -> i64 {
    i64::try_from(d.as_secs()).unwrap_or(i64::MAX)
}
