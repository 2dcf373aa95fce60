//! Shared fixtures: a fake identity provider and a gateway wired to it

#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{HeaderMap, Request, Response, header::SET_COOKIE},
    routing::{any, get},
};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use rcgen::PublicKeyData;
use serde_json::{Value, json};
use tower::ServiceExt;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use redovisa_gateway::{
    app::placeholder_router,
    config::Config,
    gateway::{CurrentSession, Gateway},
    session::MemoryCache,
};

pub const CLIENT_ID: &str = "redovisa";
pub const CLIENT_SECRET: &str = "s3cret";
pub const BASE_URI: &str = "https://app.example.com/";
pub const COOKIE: &str = "session_id";

/// EC P-256 signing key published through the fake JWKS.
pub struct SigningKey {
    pub kid: String,
    pair: rcgen::KeyPair,
}

impl SigningKey {
    pub fn generate(kid: &str) -> Self {
        Self {
            kid: kid.to_string(),
            pair: rcgen::KeyPair::generate().unwrap(),
        }
    }

    pub fn jwk(&self) -> Value {
        let der = self.pair.subject_public_key_info();
        let raw = &der[der.len() - 65..];
        json!({
            "kty": "EC",
            "crv": "P-256",
            "alg": "ES256",
            "use": "sig",
            "kid": self.kid,
            "x": URL_SAFE_NO_PAD.encode(&raw[1..33]),
            "y": URL_SAFE_NO_PAD.encode(&raw[33..65]),
        })
    }

    pub fn sign(&self, claims: &Value) -> String {
        let mut header = Header::new(Algorithm::ES256);
        header.kid = Some(self.kid.clone());
        let key = EncodingKey::from_ec_pem(self.pair.serialize_pem().as_bytes()).unwrap();
        jsonwebtoken::encode(&header, claims, &key).unwrap()
    }
}

/// Wiremock identity provider with discovery, JWKS and token endpoints.
pub struct FakeIdp {
    pub server: MockServer,
    pub key: SigningKey,
}

impl FakeIdp {
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        let key = SigningKey::generate("idp-key-1");
        let uri = server.uri();

        Mock::given(method("GET"))
            .and(path("/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "issuer": uri.clone(),
                "authorization_endpoint": format!("{uri}/authorize"),
                "token_endpoint": format!("{uri}/token"),
                "userinfo_endpoint": format!("{uri}/userinfo"),
                "jwks_uri": format!("{uri}/jwks"),
                "id_token_signing_alg_values_supported": ["ES256"],
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "keys": [key.jwk()] })))
            .mount(&server)
            .await;

        Self { server, key }
    }

    pub fn issuer(&self) -> String {
        self.server.uri()
    }

    pub fn configuration_uri(&self) -> String {
        format!("{}/.well-known/openid-configuration", self.server.uri())
    }

    /// Claims for a user, valid for ten minutes.
    pub fn claims(&self, email: &str) -> Value {
        let now = chrono::Utc::now().timestamp();
        json!({
            "iss": self.issuer(),
            "aud": CLIENT_ID,
            "sub": "u1",
            "email": email,
            "given_name": "Alice",
            "family_name": "Andersson",
            "iat": now,
            "exp": now + 600,
        })
    }

    /// Answer the token endpoint for `code` with an ID token over `claims`.
    pub async fn issue_token(&self, code: &str, claims: &Value) {
        let id_token = self.key.sign(claims);
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains(format!("code={code}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "at",
                "token_type": "Bearer",
                "expires_in": 600,
                "id_token": id_token,
            })))
            .mount(&self.server)
            .await;
    }
}

pub fn config(idp: &FakeIdp) -> Config {
    let mut config = Config::default();
    config.oidc.configuration_uri = idp.configuration_uri();
    config.oidc.client_id = CLIENT_ID.to_string();
    config.oidc.client_secret = CLIENT_SECRET.to_string();
    config.oidc.base_uri = BASE_URI.to_string();
    config.paths.login_redirect_uri = Some("/".to_string());
    config.paths.excluded_pattern = Some("^/public/".to_string());
    config
}

/// Downstream app: the placeholder routes plus a protected page and a public area.
pub fn downstream() -> Router {
    Router::new()
        .route(
            "/reports",
            get(|CurrentSession(session): CurrentSession| async move {
                session.map_or_else(|| "anonymous".to_string(), |s| s.email)
            }),
        )
        .route(
            "/public/{*rest}",
            any(|CurrentSession(session): CurrentSession| async move {
                session.map_or_else(|| "anonymous".to_string(), |s| s.email)
            }),
        )
        .merge(placeholder_router("/forbidden").unwrap())
}

pub async fn gateway(config: Config) -> (Router, Arc<MemoryCache>) {
    let cache = Arc::new(MemoryCache::new());
    let gateway = Gateway::with_session_cache(config, cache.clone()).await.unwrap();
    (gateway.protect(downstream()), cache)
}

pub async fn send(router: &Router, request: Request<Body>) -> Response<Body> {
    router.clone().oneshot(request).await.unwrap()
}

pub fn get_request(uri: &str, cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(value) = cookie {
        builder = builder.header("cookie", format!("{COOKIE}={value}"));
    }
    builder.body(Body::empty()).unwrap()
}

/// The session `Set-Cookie` header, if any.
pub fn session_set_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with(&format!("{COOKIE}=")))
        .map(str::to_string)
}

/// Value part of a `Set-Cookie` header.
pub fn cookie_value(set_cookie: &str) -> String {
    set_cookie
        .split(';')
        .next()
        .and_then(|pair| pair.split_once('='))
        .map(|(_, value)| value.to_string())
        .unwrap_or_default()
}

pub fn location(response: &Response<Body>) -> String {
    response.headers()["location"].to_str().unwrap().to_string()
}

pub async fn body_text(response: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}
