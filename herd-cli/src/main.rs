//! Herd CLI
//!
//! Command-line interface for the Herd orchestrator. Besides the usual
//! inspection commands it provides `herd notify`, which generated job
//! scripts call to report that they started or ended.

mod api;
mod commands;
mod config;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, handle_command};
use config::Config;

#[derive(Parser)]
#[command(name = "herd")]
#[command(about = "Herd cluster job CLI", long_about = None)]
struct Cli {
    /// Orchestrator URL
    #[arg(
        long = "url",
        global = true,
        env = "HERD_URL",
        default_value = "http://localhost:8080"
    )]
    orchestrator_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::new(cli.orchestrator_url);

    handle_command(cli.command, &config).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use commands::NotifyCommands;

    #[test]
    fn test_notify_accepts_url_after_subcommand() {
        let cli = Cli::try_parse_from([
            "herd", "notify", "--url", "http://10.0.0.1:8080", "ended", "12", "", "0",
        ])
        .unwrap();
        assert_eq!(cli.orchestrator_url, "http://10.0.0.1:8080");
        match cli.command {
            Commands::Notify {
                command: NotifyCommands::Ended { id, index, exit_code },
            } => {
                assert_eq!(id, 12);
                assert_eq!(index, "");
                assert_eq!(exit_code, 0);
            }
            _ => panic!("expected notify ended"),
        }
    }

    #[test]
    fn test_fail_with_index() {
        let cli = Cli::try_parse_from(["herd", "fail", "7", "--index", "3", "node lost"]).unwrap();
        match cli.command {
            Commands::Fail { id, index, message } => {
                assert_eq!(id, 7);
                assert_eq!(index, Some(3));
                assert_eq!(message, "node lost");
            }
            _ => panic!("expected fail"),
        }
    }
}
