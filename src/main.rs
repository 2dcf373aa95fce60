//! Redovisa Gateway - OpenID Connect authentication gateway
//!
//! Serves a placeholder application behind the login gate.

use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde_json::json;
use tracing::{error, info};

use redovisa_gateway::{
    app::placeholder_router,
    cli::{Cli, Command},
    config::Config,
    gateway::Gateway,
    oidc::{JwksVerifier, OidcConfiguration},
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let result = match cli.command {
        Some(Command::Discover { ref format }) => run_discover(&cli, format).await,
        Some(Command::Serve) | None => run_server(&cli).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config =
        Config::load(cli.config.as_deref()).context("Failed to load configuration")?;

    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(ref host) = cli.host {
        config.server.host = host.clone();
    }

    Ok(config)
}

/// Print the provider's discovery document and key ids
async fn run_discover(cli: &Cli, format: &str) -> anyhow::Result<()> {
    let config = load_config(cli)?;
    anyhow::ensure!(
        !config.oidc.configuration_uri.is_empty(),
        "oidc.configuration_uri is required"
    );

    let http = reqwest::Client::builder()
        .timeout(config.oidc.request_timeout)
        .build()
        .context("Failed to build HTTP client")?;

    let configuration = OidcConfiguration::discover(&http, &config.oidc.configuration_uri)
        .await
        .context("Discovery failed")?;
    let verifier = JwksVerifier::load(
        http,
        &configuration,
        config.oidc.client_id.clone(),
        Duration::ZERO,
    )
    .await
    .context("Failed to load issuer keys")?;

    if format == "json" {
        let output = json!({
            "configuration": configuration,
            "key_ids": verifier.key_ids(),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("Issuer:                 {}", configuration.issuer);
        println!("Authorization endpoint: {}", configuration.authorization_endpoint);
        println!("Token endpoint:         {}", configuration.token_endpoint);
        println!("Userinfo endpoint:      {}", configuration.userinfo_endpoint);
        println!("JWKS URI:               {}", configuration.jwks_uri);
        if !configuration.id_token_signing_alg_values_supported.is_empty() {
            println!(
                "Signing algorithms:     {}",
                configuration.id_token_signing_alg_values_supported.join(", ")
            );
        }
        println!("Key ids:");
        for kid in verifier.key_ids() {
            println!("  {kid}");
        }
    }

    Ok(())
}

/// Run the gateway server
async fn run_server(cli: &Cli) -> anyhow::Result<()> {
    let config = load_config(cli)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        oidc_configuration_uri = %config.oidc.configuration_uri,
        "Starting Redovisa Gateway"
    );

    let app = placeholder_router(&config.paths.forbidden)?;

    let gateway = Gateway::new(config)
        .await
        .context("Failed to create gateway")?;

    gateway.run(app).await.context("Gateway error")?;

    info!("Gateway shutdown complete");
    Ok(())
}
