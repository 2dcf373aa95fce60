//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Redovisa Gateway - OpenID Connect login in front of any web application
#[derive(Parser, Debug)]
#[command(name = "redovisa-gateway")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "REDOVISA_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "REDOVISA_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "REDOVISA_HOST")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "REDOVISA_LOG_LEVEL", global = true)]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "REDOVISA_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the gateway server (default)
    Serve,

    /// Fetch and print the identity provider's discovery document and key ids
    Discover {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}
