//! Gateway server

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{Router, middleware};
use reqwest::Client;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::{
    catch_panic::CatchPanicLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{debug, info, warn};

use super::auth::{AuthGate, GateSettings, auth_gate};
use super::paths::PathMatcher;
use crate::config::Config;
use crate::oidc::{JwksVerifier, OidcConfiguration, TokenExchanger, TokenVerifier};
use crate::session::{MemoryCache, RedisCache, SessionCache, SessionStore, spawn_reaper};
use crate::users::AllowList;
use crate::{Error, Result};

/// OIDC authentication gateway
pub struct Gateway {
    /// Configuration
    config: Config,
    /// Provider metadata
    configuration: OidcConfiguration,
    /// Key set, shared with the gate
    verifier: Arc<JwksVerifier>,
    /// Request-dispatch state
    gate: Arc<AuthGate>,
    /// Shutdown broadcast for background tasks
    shutdown_tx: tokio::sync::broadcast::Sender<()>,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("issuer", &self.configuration.issuer)
            .field("gate", &self.gate)
            .finish_non_exhaustive()
    }
}

impl Gateway {
    /// Create a gateway, connecting to the configured session cache.
    ///
    /// Uses Redis when `cache.redis_url` is set, otherwise an in-process cache.
    ///
    /// # Errors
    ///
    /// Fails if the configuration is invalid, the cache is unreachable, or
    /// the provider's discovery document or key set cannot be loaded.
    pub async fn new(config: Config) -> Result<Self> {
        let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);

        let cache: Arc<dyn SessionCache> = if let Some(url) = &config.cache.redis_url {
            Arc::new(RedisCache::connect(url).await?)
        } else {
            warn!("No cache.redis_url configured, sessions are kept in memory");
            let memory = Arc::new(MemoryCache::new());
            spawn_reaper(
                Arc::clone(&memory),
                config.cache.reaper_interval,
                shutdown_tx.subscribe(),
            );
            memory
        };

        Self::build(config, cache, shutdown_tx).await
    }

    /// Create a gateway over an explicit session cache.
    ///
    /// # Errors
    ///
    /// Fails if the configuration is invalid or the provider's discovery
    /// document or key set cannot be loaded.
    pub async fn with_session_cache(config: Config, cache: Arc<dyn SessionCache>) -> Result<Self> {
        let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
        Self::build(config, cache, shutdown_tx).await
    }

    async fn build(
        config: Config,
        cache: Arc<dyn SessionCache>,
        shutdown_tx: tokio::sync::broadcast::Sender<()>,
    ) -> Result<Self> {
        config.validate()?;

        let http = provider_client(config.oidc.request_timeout)?;

        let configuration = OidcConfiguration::discover(&http, &config.oidc.configuration_uri)
            .await
            .map_err(Error::Discovery)?;

        info!(
            oidc_issuer = %configuration.issuer,
            oidc_configuration_uri = %config.oidc.configuration_uri,
            "Loaded OIDC configuration"
        );

        let verifier = Arc::new(
            JwksVerifier::load(
                http.clone(),
                &configuration,
                config.oidc.client_id.clone(),
                config.oidc.key_refresh_cooldown,
            )
            .await
            .map_err(Error::Discovery)?,
        );

        let exchanger = TokenExchanger::new(
            http,
            &configuration,
            config.oidc.client_id.clone(),
            config.oidc.client_secret.clone(),
        );

        let users = config
            .users
            .file
            .as_ref()
            .map(|file| AllowList::load(file, config.users.ttl))
            .transpose()?
            .map(Arc::new);

        // Rejected users land on the forbidden page without a session
        let excluded = PathMatcher::new(
            config
                .paths
                .excluded
                .iter()
                .chain(std::iter::once(&config.paths.forbidden))
                .cloned(),
            config.paths.excluded_pattern.as_deref(),
        )?;

        let gate = Arc::new(AuthGate::new(
            GateSettings::from_config(&config)?,
            &configuration,
            exchanger,
            Arc::clone(&verifier) as Arc<dyn TokenVerifier>,
            SessionStore::new(cache),
            users,
            excluded,
        )?);

        if let Some(interval) = config.oidc.key_refresh_interval {
            spawn_key_refresh(Arc::clone(&verifier), interval, shutdown_tx.subscribe());
        }

        Ok(Self {
            config,
            configuration,
            verifier,
            gate,
            shutdown_tx,
        })
    }

    /// Provider metadata loaded at construction.
    pub fn configuration(&self) -> &OidcConfiguration {
        &self.configuration
    }

    /// Request-dispatch state, for mounting the middleware by hand.
    pub fn gate(&self) -> Arc<AuthGate> {
        Arc::clone(&self.gate)
    }

    /// Wrap `app` so every request passes through the gate.
    ///
    /// The gate also answers the login, logout and callback paths, so `app`
    /// does not need routes for them.
    pub fn protect(&self, app: Router) -> Router {
        Router::new()
            .fallback_service(app)
            .layer(middleware::from_fn_with_state(self.gate(), auth_gate))
            .layer(CatchPanicLayer::new())
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// Serve `app` behind the gate until Ctrl-C or SIGTERM.
    ///
    /// # Errors
    ///
    /// Fails if the listen address is invalid or cannot be bound.
    pub async fn run(self, app: Router) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        let router = self.protect(app);
        let listener = TcpListener::bind(addr).await?;

        info!(
            host = %self.config.server.host,
            port = self.config.server.port,
            oidc_issuer = %self.configuration.issuer,
            keys = self.verifier.key_ids().len(),
            "Listening"
        );

        let drain_timeout = self.config.server.shutdown_timeout;
        let mut signalled = self.shutdown_tx.subscribe();
        let server = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal(self.shutdown_tx.clone()))
            .into_future();

        // Open connections get `shutdown_timeout` to drain after the signal
        tokio::select! {
            result = server => result.map_err(|e| Error::Internal(e.to_string()))?,
            () = async {
                let _ = signalled.recv().await;
                tokio::time::sleep(drain_timeout).await;
            } => {
                warn!(timeout = ?drain_timeout, "Graceful shutdown timed out, dropping open connections");
            }
        }

        self.shutdown();
        info!("Gateway stopped");
        Ok(())
    }

    /// Stop background tasks without serving.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// HTTP client for provider calls, with a bounded timeout.
fn provider_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!("redovisa-gateway/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| Error::Internal(format!("HTTP client: {e}")))
}

/// Re-fetch the key set every `interval` until shutdown.
fn spawn_key_refresh(
    verifier: Arc<JwksVerifier>,
    interval: Duration,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately and the keys are fresh
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match verifier.refresh().await {
                        Ok(count) => debug!(key_count = count, "Periodic key refresh"),
                        Err(e) => warn!(error = %e, "Periodic key refresh failed, keeping loaded keys"),
                    }
                }
                _ = shutdown.recv() => break,
            }
        }
    });
}

/// Shutdown signal handler
async fn shutdown_signal(shutdown_tx: tokio::sync::broadcast::Sender<()>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
    let _ = shutdown_tx.send(());
}
