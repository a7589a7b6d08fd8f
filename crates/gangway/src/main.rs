// SPDX-FileCopyrightText: 2026 Gangway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Gangway - a multi-tenant gateway binding chat channels to a remote AI
//! assistant backend.
//!
//! This is the binary entry point for the gateway process.

mod serve;

use clap::{Parser, Subcommand};

/// Gangway - chat-to-agent gateway.
#[derive(Parser, Debug)]
#[command(name = "gangway", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the gateway process.
    Serve,
    /// Validate the configuration file and report any errors.
    CheckConfig,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Load and validate configuration at startup.
    let config = match gangway_config::load_and_validate() {
        Ok(config) => config,
        Err(errors) => {
            gangway_config::render_errors(&errors);
            std::process::exit(1);
        }
    };

    match cli.command {
        Some(Commands::Serve) => {
            if let Err(e) = serve::run_serve(config).await {
                eprintln!("error: {e}");
                std::process::exit(1);
            }
        }
        Some(Commands::CheckConfig) => {
            println!("Configuration is valid (gateway.name={}).", config.gateway.name);
        }
        None => {
            println!("gangway: use --help for available commands");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_serve() {
        let cli = Cli::parse_from(["gangway", "serve"]);
        assert!(matches!(cli.command, Some(Commands::Serve)));
    }

    #[test]
    fn cli_parses_check_config() {
        let cli = Cli::parse_from(["gangway", "check-config"]);
        assert!(matches!(cli.command, Some(Commands::CheckConfig)));
    }

    #[test]
    fn cli_allows_no_subcommand() {
        let cli = Cli::parse_from(["gangway"]);
        assert!(cli.command.is_none());
    }

    #[test]
    fn default_config_is_valid() {
        let config = gangway_config::load_config_from_str("").unwrap();
        assert!(gangway_config::validate_config(&config).is_ok());
    }
}
