//! SLURM backend
//!
//! Queues jobs with `sbatch --wrap`, cancels with `scancel`, and inspects
//! finished jobs with `sacct`. Generated scripts report started/ended back
//! to the orchestrator through the configured notify command.

use async_trait::async_trait;
use herd_core::backend::{
    BackendError, BackendPort, CancelTarget, LaunchError, LaunchRequest, ScriptDialect, StagedFile,
};
use herd_core::domain::job::{JobId, JobSpec};
use herd_core::domain::log::LaunchResult;
use herd_core::domain::result::{JobResult, ResultType};
use std::path::PathBuf;
use tracing::{debug, info, warn};

use crate::config::SlurmConfig;
use crate::process;
use crate::staging;

/// `args` keys and the `sbatch` flag each maps to
const SBATCH_FLAGS: &[(&str, &str)] = &[
    ("account", "--account"),
    ("cpus", "--cpus-per-task"),
    ("gres", "--gres"),
    ("mem", "--mem"),
    ("partition", "--partition"),
    ("qos", "--qos"),
    ("time", "--time"),
];

pub struct SlurmBackend {
    config: SlurmConfig,
}

impl SlurmBackend {
    pub fn new(config: SlurmConfig) -> Self {
        Self { config }
    }

    /// Arguments for `sbatch`, ending with the wrapped command
    fn sbatch_args(&self, request: &LaunchRequest<'_>) -> Vec<String> {
        let spec = request.spec;
        let mut args = vec![
            "--parsable".to_string(),
            format!("--job-name={}", spec.cluster_name),
            format!("--chdir={}", spec.working_dir.display()),
        ];

        match spec.array_size() {
            Some(size) => {
                let output = spec
                    .working_dir
                    .join(format!("herd-{}_%a.out", request.job_id));
                args.push(format!("--output={}", output.display()));
                args.push(format!("--array=1-{}", size));
            }
            None => {
                let output = spec.output_path(request.job_id, None);
                args.push(format!("--output={}", output.display()));
            }
        }

        if !request.dependencies.is_empty() {
            args.push(format!(
                "--dependency=afterok:{}",
                request.dependencies.join(":")
            ));
        }

        for (key, flag) in SBATCH_FLAGS {
            if let Some(value) = spec.args.get(*key).and_then(arg_to_string) {
                args.push(format!("{}={}", flag, value));
            }
        }

        args.push(format!("--wrap={}", request.command));
        args
    }

    /// `sacct` job id for a job or one of its elements
    fn accounting_id(native_id: &str, array_index: Option<u32>) -> String {
        match array_index {
            Some(index) => format!("{}_{}", native_id, index),
            None => native_id.to_string(),
        }
    }

    async fn accounting_state(&self, id: &str) -> Option<String> {
        let args = vec![
            "-n".to_string(),
            "-P".to_string(),
            "-X".to_string(),
            "-j".to_string(),
            id.to_string(),
            "-o".to_string(),
            "State".to_string(),
        ];
        match process::run(&self.config.sacct, &args).await {
            Ok(output) if output.success() => output
                .stdout
                .lines()
                .map(str::trim)
                .find(|line| !line.is_empty())
                .map(str::to_string),
            Ok(output) => {
                warn!("sacct failed for {}: {}", id, output.console());
                None
            }
            Err(e) => {
                warn!("sacct unavailable for {}: {}", id, e);
                None
            }
        }
    }
}

fn arg_to_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Maps a `sacct` state onto a result type
fn state_to_result_type(state: &str) -> ResultType {
    let state = state.split_whitespace().next().unwrap_or_default();
    match state {
        "CANCELLED" | "CANCELLED+" => ResultType::Canceled,
        "FAILED" | "TIMEOUT" | "OUT_OF_MEMORY" | "NODE_FAIL" | "BOOT_FAIL" | "DEADLINE" => {
            ResultType::Failure
        }
        _ => ResultType::Success,
    }
}

#[async_trait]
impl BackendPort for SlurmBackend {
    fn name(&self) -> &'static str {
        "slurm"
    }

    fn dialect(&self) -> ScriptDialect {
        ScriptDialect::slurm(self.config.notify_command.clone())
    }

    fn validate(&self, spec: &JobSpec) -> Result<(), BackendError> {
        if spec.cluster_name.is_empty() {
            return Err(BackendError::Invalid("cluster_name cannot be empty".to_string()));
        }
        if spec
            .cluster_name
            .chars()
            .any(|c| c.is_whitespace() || c == '"' || c == '\'')
        {
            return Err(BackendError::Invalid(format!(
                "cluster_name '{}' contains whitespace or quotes",
                spec.cluster_name
            )));
        }
        if !spec.working_dir.is_absolute() {
            return Err(BackendError::Invalid(format!(
                "working_dir '{}' must be absolute",
                spec.working_dir.display()
            )));
        }
        for (key, value) in &spec.args {
            if !SBATCH_FLAGS.iter().any(|(known, _)| known == key) {
                return Err(BackendError::Invalid(format!("unknown argument '{}'", key)));
            }
            if arg_to_string(value).is_none() {
                return Err(BackendError::Invalid(format!(
                    "argument '{}' must be a string or a number",
                    key
                )));
            }
        }
        Ok(())
    }

    fn validate_dependency(&self, native_id: &str) -> Result<(), BackendError> {
        let (job, index) = match native_id.split_once('_') {
            Some((job, index)) => (job, Some(index)),
            None => (native_id, None),
        };
        let numeric = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit());
        if numeric(job) && index.is_none_or(numeric) {
            Ok(())
        } else {
            Err(BackendError::InvalidDependency(native_id.to_string()))
        }
    }

    async fn stage(&self, folders: &[PathBuf], files: &[StagedFile]) -> Result<(), BackendError> {
        staging::stage(folders, files).await
    }

    async fn launch(&self, request: LaunchRequest<'_>) -> Result<Option<LaunchResult>, LaunchError> {
        if request.spec.array_size() == Some(0) {
            debug!("Job {} is an empty array, nothing to queue", request.job_id);
            return Ok(None);
        }

        let args = self.sbatch_args(&request);
        let output = process::run(&self.config.sbatch, &args)
            .await
            .map_err(|e| LaunchError::new(e.to_string(), e.to_string()))?;

        if !output.success() {
            return Err(LaunchError::new(
                format!("sbatch exited with code {}", output.exit_code),
                output.console(),
            ));
        }

        // --parsable prints "<id>" or "<id>;<cluster>"
        let native_id = output
            .stdout
            .trim()
            .split(';')
            .next()
            .unwrap_or_default()
            .to_string();
        if native_id.is_empty() {
            return Err(LaunchError::new(
                "sbatch did not print a job id",
                output.console(),
            ));
        }

        info!("Job {} queued as SLURM job {}", request.job_id, native_id);

        Ok(Some(LaunchResult {
            native_id,
            output: output.console(),
            cleanup: Vec::new(),
        }))
    }

    async fn cancel(&self, targets: &[CancelTarget]) -> Result<(), BackendError> {
        if targets.is_empty() {
            return Ok(());
        }
        let ids: Vec<String> = targets.iter().map(|t| t.native_id.clone()).collect();
        let output = process::run(&self.config.scancel, &ids).await?;
        if !output.success() {
            return Err(BackendError::Command(format!(
                "scancel exited with code {}: {}",
                output.exit_code,
                output.console()
            )));
        }
        info!("Requested cancellation of SLURM jobs {}", ids.join(", "));
        Ok(())
    }

    async fn result(
        &self,
        job_id: JobId,
        spec: &JobSpec,
        launch: Option<&LaunchResult>,
        array_index: Option<u32>,
    ) -> JobResult {
        let output = staging::read_output(&spec.output_path(job_id, array_index)).await;

        let result_type = match launch {
            Some(launch) => {
                let id = Self::accounting_id(&launch.native_id, array_index);
                self.accounting_state(&id)
                    .await
                    .map(|state| state_to_result_type(&state))
                    .unwrap_or(ResultType::Success)
            }
            None => ResultType::Success,
        };

        match result_type {
            ResultType::Canceled => JobResult {
                output,
                ..JobResult::canceled("canceled by scheduler")
            },
            ResultType::Failure => JobResult::failure(output),
            ResultType::Success => JobResult::success(output),
        }
    }

    async fn delete_files(&self, paths: &[PathBuf]) {
        staging::remove_files(paths).await;
    }

    async fn waiting_reason(&self, launch: &LaunchResult) -> Option<String> {
        let args = vec![
            "-h".to_string(),
            "-j".to_string(),
            launch.native_id.clone(),
            "-o".to_string(),
            "%r".to_string(),
        ];
        match process::run(&self.config.squeue, &args).await {
            Ok(output) if output.success() => output
                .stdout
                .lines()
                .map(str::trim)
                .find(|line| !line.is_empty() && *line != "None")
                .map(str::to_string),
            Ok(_) => None,
            Err(e) => {
                warn!("squeue unavailable: {}", e);
                None
            }
        }
    }
}
