//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod job;
mod notify;
mod owner;

pub use notify::NotifyCommands;

use anyhow::Result;
use clap::Subcommand;
use herd_core::domain::job::JobId;
use std::path::PathBuf;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Submit a job described by a JSON file
    Submit {
        /// Path to a JSON job spec
        spec: PathBuf,
    },
    /// Show a job, or one element of an array job
    Show {
        id: JobId,

        /// Array element to show
        #[arg(long)]
        index: Option<u32>,
    },
    /// Explain why a launched job is still queued
    Waiting { id: JobId },
    /// List the jobs of an owner
    Owner { owner: String },
    /// Cancel every job of an owner
    Cancel { owner: String },
    /// Delete every job of an owner
    Delete { owner: String },
    /// Record an out-of-band failure for a job
    Fail {
        id: JobId,

        /// Array element the failure concerns
        #[arg(long)]
        index: Option<u32>,

        message: String,
    },
    /// Lifecycle callbacks used by job scripts
    Notify {
        #[command(subcommand)]
        command: NotifyCommands,
    },
}

/// Handle a CLI command
///
/// Routes the command to the appropriate handler module.
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    let client = config.client();

    match command {
        Commands::Submit { spec } => job::submit(&client, &spec).await,
        Commands::Show { id, index } => job::show(&client, id, index).await,
        Commands::Waiting { id } => job::waiting(&client, id).await,
        Commands::Fail { id, index, message } => job::fail(&client, id, index, message).await,
        Commands::Owner { owner } => owner::list(&client, &owner).await,
        Commands::Cancel { owner } => owner::cancel(&client, &owner).await,
        Commands::Delete { owner } => owner::delete(&client, &owner).await,
        Commands::Notify { command } => notify::handle_notify_command(command, &client).await,
    }
}
