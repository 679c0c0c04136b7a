//! Streaming-log collaborator
//!
//! Receives the final result of every job exactly once, using element 1 as
//! the representative of an array job.

use herd_core::domain::job::JobId;
use herd_core::domain::result::JobResult;

pub trait LogStream: Send + Sync {
    fn stream_log_end(&self, job_id: JobId, result: &JobResult);
}

/// Closes job logs by writing them to tracing
pub struct TracingLogStream;

impl LogStream for TracingLogStream {
    fn stream_log_end(&self, job_id: JobId, result: &JobResult) {
        tracing::info!(
            job_id,
            result_type = %result.result_type,
            exit_code = ?result.exit_code,
            output_bytes = result.output.len(),
            "Job log closed"
        );
        if !result.output.is_empty() {
            tracing::debug!(job_id, "Job output:\n{}", result.output);
        }
    }
}
