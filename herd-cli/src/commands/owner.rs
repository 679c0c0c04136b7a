//! Owner command handlers

use anyhow::Result;
use colored::*;
use herd_core::domain::status::CancelOutcome;

use crate::api::ApiClient;
use crate::commands::job::print_job_summary;

pub async fn list(client: &ApiClient, owner: &str) -> Result<()> {
    let jobs = client.list_owner_jobs(owner).await?;

    if jobs.is_empty() {
        println!("{}", format!("No jobs found for owner {}.", owner).yellow());
    } else {
        println!(
            "{}",
            format!("Found {} job(s) for owner {}:", jobs.len(), owner).bold()
        );
        println!();
        for view in &jobs {
            print_job_summary(view);
        }
    }

    Ok(())
}

pub async fn cancel(client: &ApiClient, owner: &str) -> Result<()> {
    let response = client.cancel_owner(owner).await?;

    match response.outcome {
        CancelOutcome::UnknownJob => {
            println!("{}", format!("Owner {} has no jobs.", owner).yellow())
        }
        CancelOutcome::CancelRequested => println!(
            "{} Cancel requested, waiting for running jobs of {} to stop",
            "…".cyan(),
            owner
        ),
        CancelOutcome::AllCanceled => {
            println!("{} All jobs of {} canceled", "✓".green(), owner)
        }
    }

    Ok(())
}

pub async fn delete(client: &ApiClient, owner: &str) -> Result<()> {
    let response = client.delete_owner(owner).await?;
    println!("{} Deleted {} job(s) of {}", "✓".green(), response.deleted, owner);
    Ok(())
}
