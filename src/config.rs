//! Configuration management

use std::{
    env,
    path::{Path, PathBuf},
    time::Duration,
};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::oidc::{ClaimsSource, DEFAULT_SCOPES};
use crate::{Error, Result};

/// Longest accepted `auth_ttl` / `session_ttl`.
pub const MAX_TTL: Duration = Duration::from_secs(365 * 24 * 3600);

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before processing config.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    /// Variables are set into the process environment for `${VAR}` resolution.
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// Identity provider and client registration
    pub oidc: OidcConfig,
    /// Session cookie
    pub cookie: CookieConfig,
    /// Gate paths and exclusions
    pub paths: PathsConfig,
    /// Session cache backend
    pub cache: CacheConfig,
    /// Optional allow-list
    pub users: UsersConfig,
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// Environment variables use the `REDOVISA_` prefix with `__` between
    /// nesting levels, e.g. `REDOVISA_OIDC__CLIENT_SECRET`.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed("REDOVISA_").split("__"));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        // Env files first so ${VAR} can refer to them
        config.load_env_files();
        config.expand_env_vars()?;

        Ok(config)
    }

    /// Check that the configuration can drive a gateway.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first offending setting.
    pub fn validate(&self) -> Result<()> {
        let oidc = &self.oidc;
        for (name, value) in [
            ("oidc.configuration_uri", &oidc.configuration_uri),
            ("oidc.client_id", &oidc.client_id),
            ("oidc.client_secret", &oidc.client_secret),
            ("oidc.base_uri", &oidc.base_uri),
        ] {
            if value.trim().is_empty() {
                return Err(Error::Config(format!("{name} is required")));
            }
        }

        for (name, value) in [
            ("oidc.configuration_uri", &oidc.configuration_uri),
            ("oidc.base_uri", &oidc.base_uri),
        ] {
            Url::parse(value).map_err(|e| Error::Config(format!("{name}: {e}")))?;
        }

        if oidc.scopes.is_empty() {
            return Err(Error::Config("oidc.scopes must not be empty".to_string()));
        }

        for (name, value) in [
            ("oidc.auth_ttl", oidc.auth_ttl),
            ("oidc.session_ttl", oidc.session_ttl),
        ] {
            if value.is_zero() || value > MAX_TTL {
                return Err(Error::Config(format!(
                    "{name} must be between 1s and {}s",
                    MAX_TTL.as_secs()
                )));
            }
        }

        let paths = &self.paths;
        for (name, value) in [
            ("paths.login", &paths.login),
            ("paths.logout", &paths.logout),
            ("paths.callback", &paths.callback),
            ("paths.forbidden", &paths.forbidden),
        ] {
            if !value.starts_with('/') {
                return Err(Error::Config(format!("{name} must start with '/'")));
            }
        }

        let gate_paths = [&paths.login, &paths.logout, &paths.callback, &paths.forbidden];
        for (i, a) in gate_paths.iter().enumerate() {
            if gate_paths[i + 1..].contains(a) {
                return Err(Error::Config(
                    "paths.login, paths.logout, paths.callback and paths.forbidden must differ"
                        .to_string(),
                ));
            }
        }

        if let Some(pattern) = &paths.excluded_pattern {
            Regex::new(pattern)
                .map_err(|e| Error::Config(format!("paths.excluded_pattern: {e}")))?;
        }

        if self.cookie.name.is_empty() {
            return Err(Error::Config("cookie.name must not be empty".to_string()));
        }

        if let Some(url) = &self.cache.redis_url {
            Url::parse(url).map_err(|e| Error::Config(format!("cache.redis_url: {e}")))?;
        }

        Ok(())
    }

    /// Absolute URI the provider redirects back to.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `oidc.base_uri` is not a URL.
    pub fn callback_uri(&self) -> Result<String> {
        let base = Url::parse(&self.oidc.base_uri)
            .map_err(|e| Error::Config(format!("oidc.base_uri: {e}")))?;
        let joined = base
            .join(&self.paths.callback)
            .map_err(|e| Error::Config(format!("paths.callback: {e}")))?;
        Ok(joined.to_string())
    }

    /// Where to land after login when no `next` path was captured.
    pub fn login_redirect_uri(&self) -> &str {
        self.paths
            .login_redirect_uri
            .as_deref()
            .unwrap_or(self.oidc.base_uri.as_str())
    }

    /// Where to land after logout.
    pub fn logout_redirect_uri(&self) -> &str {
        self.paths
            .logout_redirect_uri
            .as_deref()
            .unwrap_or(self.oidc.base_uri.as_str())
    }

    /// Load environment files into the process environment.
    /// Supports ~ expansion. Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = if path_str.starts_with('~') {
                if let Some(home) = dirs::home_dir() {
                    path_str.replacen('~', &home.display().to_string(), 1)
                } else {
                    path_str.clone()
                }
            } else {
                path_str.clone()
            };

            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => {
                        tracing::info!("Loaded env file: {expanded}");
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load env file {expanded}: {e}");
                    }
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    /// Expand ${VAR} and ${VAR:-default} patterns in credential and endpoint values
    fn expand_env_vars(&mut self) -> Result<()> {
        let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}")
            .map_err(|e| Error::Internal(e.to_string()))?;

        for value in [
            &mut self.oidc.configuration_uri,
            &mut self.oidc.client_id,
            &mut self.oidc.client_secret,
            &mut self.oidc.base_uri,
        ] {
            *value = Self::expand_string(&re, value);
        }

        if let Some(url) = self.cache.redis_url.as_mut() {
            *url = Self::expand_string(&re, url);
        }

        Ok(())
    }

    /// Expand environment variables in a string
    fn expand_string(re: &Regex, value: &str) -> String {
        re.replace_all(value, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(2).map_or("", |m| m.as_str());
            env::var(var_name).unwrap_or_else(|_| default.to_string())
        })
        .into_owned()
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Graceful shutdown timeout
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Identity provider configuration
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OidcConfig {
    /// Discovery document URL (`.../.well-known/openid-configuration`)
    pub configuration_uri: String,
    /// Registered client id, also the expected ID token audience
    pub client_id: String,
    /// Registered client secret
    pub client_secret: String,
    /// Public base URL of this service
    pub base_uri: String,
    /// Scopes requested at login
    pub scopes: Vec<String>,
    /// Lifetime of the pre-login session cookie
    #[serde(with = "humantime_serde")]
    pub auth_ttl: Duration,
    /// Session lifetime when the token carries no `exp`
    #[serde(with = "humantime_serde")]
    pub session_ttl: Duration,
    /// Read claims from the user-info endpoint instead of the ID token
    pub use_userinfo: bool,
    /// Timeout for every call to the provider
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Re-fetch the key set on this interval (disabled when unset)
    #[serde(with = "humantime_serde::option")]
    pub key_refresh_interval: Option<Duration>,
    /// Minimum time between key refreshes caused by unknown key ids
    #[serde(with = "humantime_serde")]
    pub key_refresh_cooldown: Duration,
}

impl OidcConfig {
    /// Where claims are read from after the code exchange.
    pub fn claims_source(&self) -> ClaimsSource {
        if self.use_userinfo {
            ClaimsSource::Userinfo
        } else {
            ClaimsSource::IdToken
        }
    }
}

impl Default for OidcConfig {
    fn default() -> Self {
        Self {
            configuration_uri: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            base_uri: String::new(),
            scopes: DEFAULT_SCOPES.iter().map(ToString::to_string).collect(),
            auth_ttl: Duration::from_secs(300),
            session_ttl: Duration::from_secs(86_400),
            use_userinfo: false,
            request_timeout: Duration::from_secs(10),
            key_refresh_interval: None,
            key_refresh_cooldown: Duration::from_secs(60),
        }
    }
}

impl std::fmt::Debug for OidcConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OidcConfig")
            .field("configuration_uri", &self.configuration_uri)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("base_uri", &self.base_uri)
            .field("scopes", &self.scopes)
            .field("auth_ttl", &self.auth_ttl)
            .field("session_ttl", &self.session_ttl)
            .field("use_userinfo", &self.use_userinfo)
            .field("request_timeout", &self.request_timeout)
            .field("key_refresh_interval", &self.key_refresh_interval)
            .field("key_refresh_cooldown", &self.key_refresh_cooldown)
            .finish()
    }
}

/// Session cookie configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CookieConfig {
    /// Cookie name
    pub name: String,
    /// Set the `Secure` attribute
    pub secure: bool,
    /// Optional `Domain` attribute
    pub domain: Option<String>,
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            name: "session_id".to_string(),
            secure: false,
            domain: None,
        }
    }
}

/// Gate paths
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Starts the authorization-code flow
    pub login: String,
    /// Ends the session
    pub logout: String,
    /// Provider redirect target
    pub callback: String,
    /// Landing page for users not on the allow-list
    pub forbidden: String,
    /// Landing page after login (defaults to `oidc.base_uri`)
    pub login_redirect_uri: Option<String>,
    /// Landing page after logout (defaults to `oidc.base_uri`)
    pub logout_redirect_uri: Option<String>,
    /// Paths served without a session
    pub excluded: Vec<String>,
    /// Regex anchored at the start of the path; matches are served without a session
    pub excluded_pattern: Option<String>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            login: "/login".to_string(),
            logout: "/logout".to_string(),
            callback: "/callback".to_string(),
            forbidden: "/forbidden".to_string(),
            login_redirect_uri: None,
            logout_redirect_uri: None,
            excluded: vec![
                "/forbidden".to_string(),
                "/health".to_string(),
                "/favicon.ico".to_string(),
            ],
            excluded_pattern: None,
        }
    }
}

/// Session cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Redis URL; the in-memory cache is used when unset
    pub redis_url: Option<String>,
    /// Eviction interval for the in-memory cache
    #[serde(with = "humantime_serde")]
    pub reaper_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            reaper_interval: Duration::from_secs(60),
        }
    }
}

/// Allow-list configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UsersConfig {
    /// JSON array of permitted emails; everyone is allowed when unset
    pub file: Option<PathBuf>,
    /// Re-read interval
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
}

impl Default for UsersConfig {
    fn default() -> Self {
        Self {
            file: None,
            ttl: Duration::from_secs(300),
        }
    }
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Secs(u64),
        Text(String),
    }

    /// Serialize Duration to human-readable string (e.g., "30s")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}s", duration.as_secs()))
    }

    /// Deserialize human-readable duration (e.g., "30s", "5m", "1h", "100ms" or bare seconds)
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the value cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Raw::deserialize(deserializer)? {
            Raw::Secs(secs) => Ok(Duration::from_secs(secs)),
            Raw::Text(s) => parse(&s).map_err(serde::de::Error::custom),
        }
    }

    pub(crate) fn parse(s: &str) -> Result<Duration, std::num::ParseIntError> {
        let s = s.trim();
        // "ms" before "s"
        if let Some(ms) = s.strip_suffix("ms") {
            ms.trim().parse::<u64>().map(Duration::from_millis)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.trim().parse::<u64>().map(Duration::from_secs)
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.trim().parse::<u64>().map(|m| Duration::from_secs(m * 60))
        } else if let Some(hours) = s.strip_suffix('h') {
            hours.trim().parse::<u64>().map(|h| Duration::from_secs(h * 3600))
        } else {
            s.parse::<u64>().map(Duration::from_secs)
        }
    }

    /// `Option<Duration>` variant
    pub mod option {
        use std::time::Duration;

        use serde::{Deserialize, Deserializer, Serializer};

        /// Serialize an optional duration
        ///
        /// # Errors
        ///
        /// Returns a serialization error if the serializer fails.
        pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match duration {
                Some(d) => super::serialize(d, serializer),
                None => serializer.serialize_none(),
            }
        }

        /// Deserialize an optional duration
        ///
        /// # Errors
        ///
        /// Returns a deserialization error if a present value cannot be parsed.
        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
        where
            D: Deserializer<'de>,
        {
            match Option::<super::Raw>::deserialize(deserializer)? {
                None => Ok(None),
                Some(super::Raw::Secs(secs)) => Ok(Some(Duration::from_secs(secs))),
                Some(super::Raw::Text(s)) => super::parse(&s)
                    .map(Some)
                    .map_err(serde::de::Error::custom),
            }
        }
    }
}
