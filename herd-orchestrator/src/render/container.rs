//! Sandbox wrapping
//!
//! Composes the container invocation around a command:
//! `<runtime> exec --no-home [--bind=<path>]* [--nv] --pwd "<dir>" "<image>" <command>`

use herd_core::domain::container::ContainerProfile;
use std::path::{Path, PathBuf};

use crate::render::quote;

/// Wraps commands in a sandboxed-execution invocation
#[derive(Debug, Clone)]
pub struct ContainerWrapper {
    /// Sandbox binary, e.g. `apptainer` or `singularity`
    runtime: String,
    /// Shared data root, always bound into the sandbox
    data_root: PathBuf,
}

impl ContainerWrapper {
    pub fn new(runtime: impl Into<String>, data_root: impl Into<PathBuf>) -> Self {
        Self {
            runtime: runtime.into(),
            data_root: data_root.into(),
        }
    }

    /// Prefixes `command` with the sandbox invocation for `profile`.
    ///
    /// Prelaunch lines run on the host first, one per line.
    pub fn wrap(&self, profile: &ContainerProfile, job_dir: &Path, gpu: bool, command: &str) -> String {
        let mut parts = vec![self.runtime.clone(), "exec".to_string(), "--no-home".to_string()];
        for bind in &profile.binds {
            parts.push(format!("--bind={}", bind));
        }
        parts.push(format!("--bind={}", self.data_root.display()));
        if gpu {
            parts.push("--nv".to_string());
        }
        parts.push("--pwd".to_string());
        parts.push(quote(&job_dir.display().to_string()));
        parts.push(quote(&profile.image.display().to_string()));
        parts.push(command.to_string());

        let invocation = parts.join(" ");
        if profile.prelaunch.is_empty() {
            invocation
        } else {
            format!("{}\n{}", profile.prelaunch.join("\n"), invocation)
        }
    }
}
