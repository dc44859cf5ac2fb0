//! gas-proxy - JSON proxy for Google Apps Script web apps

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use gas_proxy::{
    cli::{Cli, Command},
    config::Config,
    proxy::ProxyServer,
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    // A local .env is optional; hosted deployments set the variables directly
    if dotenvy::dotenv().is_ok() {
        info!("Loaded environment variables from .env file");
    }

    let config = match Config::load(cli.config.as_deref()) {
        Ok(mut config) => {
            if let Some(port) = cli.port {
                config.server.port = port;
            }
            if let Some(ref host) = cli.host {
                config.server.host.clone_from(host);
            }
            config
        }
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Some(Command::Check) => run_check(&config),
        Some(Command::Serve) | None => run_server(config).await,
    }
}

/// Print the effective configuration and validate the upstream secrets
fn run_check(config: &Config) -> ExitCode {
    match serde_yaml::to_string(&config.redacted()) {
        Ok(yaml) => println!("{yaml}"),
        Err(e) => {
            eprintln!("❌ Failed to render configuration: {e}");
            return ExitCode::FAILURE;
        }
    }

    match config.upstream.resolve() {
        Ok(_) => {
            println!("✅ Upstream configured");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("❌ {e}");
            ExitCode::FAILURE
        }
    }
}

/// Run the proxy server
async fn run_server(config: Config) -> ExitCode {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        path = %config.server.path,
        "Starting gas-proxy"
    );

    let server = match ProxyServer::new(config) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to create proxy server: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = server.run().await {
        error!("Proxy server error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Proxy shutdown complete");
    ExitCode::SUCCESS
}
