//! Command-line interface

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

/// Multi-tenant authenticating reverse proxy for observability backends
#[derive(Parser, Debug)]
#[command(name = "lgtm-query-gateway")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Log debug messages
    #[arg(long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Top-level verbs
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the gateway
    Serve(ServeArgs),
}

/// Options for the `serve` verb
#[derive(Parser, Debug)]
pub struct ServeArgs {
    /// Identity provider selector; must be a registered provider name
    #[arg(long, env = "PROVIDER", default_value = "entra")]
    pub provider: String,

    /// Identity provider tenant identifier
    #[arg(long, env = "TENANT_ID")]
    pub tenant_id: String,

    /// Expected audience of inbound tokens
    #[arg(long, env = "CLIENT_ID")]
    pub client_id: String,

    /// Path to the policy file
    #[arg(short = 'f', long, env = "CONFIG", default_value = "config.yaml")]
    pub config: PathBuf,

    /// TCP listen port
    #[arg(long, env = "PORT", default_value_t = 9000)]
    pub port: u16,

    /// Bypass token verification and inject synthetic claims (local testing only)
    #[arg(long, env = "DISABLE_OIDC_TOKEN_VALIDATION", default_value_t = false)]
    pub disable_token_validation: bool,

    /// Shutdown grace period for in-flight requests
    #[arg(long, env = "DRAIN_DURATION", value_parser = parse_duration, default_value = "30s")]
    pub drain_duration: Duration,
}

fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().map(Duration::from_secs).map_err(|e| e.to_string())
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>()
            .map(|m| Duration::from_secs(m * 60))
            .map_err(|e| e.to_string())
    } else {
        s.parse::<u64>().map(Duration::from_secs).map_err(|e| e.to_string())
    }
}
