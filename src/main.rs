//! Multi-tenant authenticating reverse proxy entry point.

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use lgtm_query_gateway::cli::{Cli, Command};
use lgtm_query_gateway::config::Config;
use lgtm_query_gateway::server::Gateway;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let tracer_provider = match lgtm_query_gateway::otel::init(cli.verbose, false) {
        Ok(provider) => provider,
        Err(e) => {
            eprintln!("failed to initialize tracing: {e}");
            return ExitCode::FAILURE;
        }
    };

    let Command::Serve(args) = cli.command;

    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = args.port,
        destinations = config.destinations.len(),
        disable_token_validation = args.disable_token_validation,
        "starting lgtm-query-gateway"
    );

    let gateway = match Gateway::new(
        config,
        args.port,
        &args.provider,
        &args.tenant_id,
        &args.client_id,
        args.disable_token_validation,
        args.drain_duration,
    ) {
        Ok(g) => g,
        Err(e) => {
            error!("failed to construct gateway: {e}");
            return ExitCode::FAILURE;
        }
    };

    let result = gateway.run().await;

    if let Some(provider) = tracer_provider {
        let _ = provider.shutdown();
    }

    match result {
        Ok(()) => {
            info!("gateway shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("gateway error: {e}");
            ExitCode::FAILURE
        }
    }
}
