//! Job command handlers
//!
//! Submitting, inspecting and failing single jobs.

use anyhow::{Context, Result};
use colored::*;
use herd_core::domain::job::{JobId, JobSpec};
use herd_core::domain::log::JobLog;
use herd_core::domain::result::{JobResult, ResultType};
use herd_core::domain::status::Status;
use herd_core::dto::job::{FailureReport, JobView};
use std::path::Path;

use crate::api::ApiClient;

/// Submit a job from a JSON spec file
pub async fn submit(client: &ApiClient, path: &Path) -> Result<()> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let spec: JobSpec = serde_json::from_str(&contents)
        .with_context(|| format!("Invalid job spec in {}", path.display()))?;

    match client.submit_job(&spec).await? {
        Some(id) => println!(
            "{} Submitted {} as job {}",
            "✓".green(),
            spec.web_name.bold(),
            id.to_string().cyan()
        ),
        None => println!("{}", "Nothing to run, no job was queued.".yellow()),
    }

    Ok(())
}

/// Show a job or one of its array elements
pub async fn show(client: &ApiClient, id: JobId, index: Option<u32>) -> Result<()> {
    match index {
        Some(index) => {
            let log = client.get_element_log(id, index).await?;
            println!("{}", format!("Job {} element {}:", id, index).bold());
            print_log(&log);
        }
        None => {
            let view = client.get_job(id).await?;
            print_job_details(&view);
        }
    }
    Ok(())
}

pub async fn waiting(client: &ApiClient, id: JobId) -> Result<()> {
    match client.waiting_reason(id).await? {
        Some(reason) => println!("Job {} is waiting: {}", id, reason.yellow()),
        None => println!("{}", format!("Job {} is not waiting in a queue.", id).dimmed()),
    }
    Ok(())
}

pub async fn fail(client: &ApiClient, id: JobId, index: Option<u32>, message: String) -> Result<()> {
    let report = FailureReport {
        array_index: index,
        message,
    };
    let entry = client.report_failure(id, &report).await?;
    println!(
        "{} Failure recorded for job {} at {}",
        "✗".red(),
        entry.job_id,
        entry.recorded_at.format("%Y-%m-%d %H:%M:%S")
    );
    Ok(())
}

/// Print a job summary line
pub fn print_job_summary(view: &JobView) {
    let id = view.record.id.map(|id| id.to_string()).unwrap_or_default();

    println!("  {} Job {} {}", "▸".cyan(), id.dimmed(), view.record.spec.web_name);
    println!("    Status:   {}", colorize_status(view.log.status()));
    if let Some(progress) = &view.log.progress {
        let size = view.record.spec.array_size().unwrap_or(0);
        println!(
            "    Elements: {}/{} started, {}/{} ended",
            progress.num_started, size, progress.num_ended, size
        );
    }
    if let Some(result) = &view.log.result {
        println!("    Result:   {}", colorize_result(result.result_type));
    }
    println!();
}

/// Print detailed job information
fn print_job_details(view: &JobView) {
    let spec = &view.record.spec;

    println!("{}", "Job Details:".bold());
    if let Some(id) = view.record.id {
        println!("  ID:          {}", id.to_string().cyan());
    }
    println!("  Name:        {}", spec.web_name);
    println!("  Cluster:     {}", spec.cluster_name.dimmed());
    println!("  Directory:   {}", spec.working_dir.display());
    if let Some(owner) = &spec.owner_id {
        println!("  Owner:       {}", owner);
    }
    if let Some(container) = &spec.container {
        println!("  Container:   {}", container);
    }
    if let Some(created) = view.record.created_at {
        println!("  Created:     {}", created.format("%Y-%m-%d %H:%M:%S"));
    }
    if let Some(size) = spec.array_size() {
        println!("  Array size:  {}", size);
    }
    if !spec.dependencies.is_empty() {
        println!("  Depends on:  {}", spec.dependencies.join(", "));
    }

    if !spec.args.is_empty() {
        println!("\n{}", "Arguments:".bold());
        for (key, value) in &spec.args {
            println!("  {} = {}", key.cyan(), value);
        }
    }

    print_log(&view.log);
}

fn print_log(log: &JobLog) {
    println!("  Status:      {}", colorize_status(log.status()));

    if let Some(launch) = &log.launch {
        println!("  Native ID:   {}", launch.native_id.cyan());
    }
    if let Some(progress) = &log.progress {
        println!(
            "  Progress:    {} started, {} ended, {} failed, {} canceled",
            progress.num_started, progress.num_ended, progress.num_failed, progress.num_canceled
        );
    }

    if !log.history.is_empty() {
        println!("\n{}", "History:".bold());
        for entry in &log.history {
            println!(
                "  {} {}",
                entry.at.format("%H:%M:%S").to_string().dimmed(),
                colorize_status(Some(entry.status))
            );
        }
    }

    if let Some(result) = &log.result {
        print_result(result);
    }
}

fn print_result(result: &JobResult) {
    println!("\n{}", "Result:".bold());
    println!("  Type:        {}", colorize_result(result.result_type));
    if let Some(code) = result.exit_code {
        println!("  Exit Code:   {}", code);
    }
    if let Some(reason) = &result.cancel_reason {
        println!("  Reason:      {}", reason.yellow());
    }
    if !result.output.is_empty() {
        println!("\n{}", "Output:".bold());
        println!("{}", result.output);
    }
}

/// Colorize job status for display
fn colorize_status(status: Option<Status>) -> ColoredString {
    match status {
        None => "Unknown".dimmed(),
        Some(status) => {
            let name = status.to_string();
            match status {
                Status::Submitted | Status::Launched => name.yellow(),
                Status::Started => name.cyan(),
                Status::Canceling => name.magenta(),
                Status::Ended => name.green(),
                Status::Abandoned => name.red(),
            }
        }
    }
}

fn colorize_result(result_type: ResultType) -> ColoredString {
    let name = result_type.to_string();
    match result_type {
        ResultType::Success => name.green(),
        ResultType::Failure => name.red(),
        ResultType::Canceled => name.dimmed(),
    }
}
