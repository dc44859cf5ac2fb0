//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// JSON proxy for Google Apps Script web apps
#[derive(Parser, Debug)]
#[command(name = "gas-proxy")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "GAS_PROXY_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "GAS_PROXY_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "GAS_PROXY_HOST")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "GAS_PROXY_LOG_LEVEL", global = true)]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "GAS_PROXY_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the proxy server (default)
    Serve,

    /// Print the effective configuration (API key redacted) and verify
    /// that the upstream secrets are present
    Check,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_to_no_subcommand() {
        let cli = Cli::try_parse_from(["gas-proxy"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn test_check_with_config() {
        let cli = Cli::try_parse_from(["gas-proxy", "check", "--config", "proxy.yaml"]).unwrap();
        assert!(matches!(cli.command, Some(Command::Check)));
        assert_eq!(cli.config, Some(PathBuf::from("proxy.yaml")));
    }

    #[test]
    fn test_serve_overrides() {
        let cli = Cli::try_parse_from(["gas-proxy", "--port", "9000", "--host", "0.0.0.0", "serve"])
            .unwrap();
        assert!(matches!(cli.command, Some(Command::Serve)));
        assert_eq!(cli.port, Some(9000));
        assert_eq!(cli.host.as_deref(), Some("0.0.0.0"));
    }
}
