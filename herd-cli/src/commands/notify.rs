//! Notify command handlers
//!
//! Called from generated job scripts. The array index argument is always
//! passed, empty when the job is not an array job.

use anyhow::{Context, Result};
use clap::Subcommand;
use herd_core::domain::job::JobId;
use herd_core::dto::job::{EndedNotice, StartedNotice};

use crate::api::ApiClient;

#[derive(Subcommand)]
pub enum NotifyCommands {
    /// Report that a job started
    Started { id: JobId, index: String },
    /// Report that a job ended
    Ended {
        id: JobId,
        index: String,
        exit_code: i32,
    },
}

pub async fn handle_notify_command(command: NotifyCommands, client: &ApiClient) -> Result<()> {
    match command {
        NotifyCommands::Started { id, index } => {
            let notice = StartedNotice {
                array_index: parse_index(&index)?,
            };
            client.notify_started(id, &notice).await
        }
        NotifyCommands::Ended {
            id,
            index,
            exit_code,
        } => {
            let notice = EndedNotice {
                array_index: parse_index(&index)?,
                exit_code: Some(exit_code),
            };
            client.notify_ended(id, &notice).await
        }
    }
}

fn parse_index(index: &str) -> Result<Option<u32>> {
    let index = index.trim();
    if index.is_empty() {
        return Ok(None);
    }
    let parsed = index
        .parse()
        .with_context(|| format!("invalid array index: {}", index))?;
    Ok(Some(parsed))
}
