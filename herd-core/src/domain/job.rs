//! Job domain types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::domain::commands::Commands;

/// Store-generated job identifier
pub type JobId = i64;

/// Immutable description of a job, supplied by the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    /// Container profile id, if the job runs sandboxed
    #[serde(default)]
    pub container: Option<String>,
    pub commands: Commands,
    pub working_dir: PathBuf,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Free-form scheduler arguments (partition, time, gres, ...)
    #[serde(default)]
    pub args: BTreeMap<String, serde_json::Value>,
    /// `<jobId>` or `<jobId>_<arrayIndex>`
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Pipeline stage or session this job belongs to
    #[serde(default)]
    pub owner_id: Option<String>,
    #[serde(default)]
    pub owner_listener_id: Option<String>,
    /// Name shown in the web UI
    pub web_name: String,
    /// Name handed to the backend's own job naming
    pub cluster_name: String,
}

impl JobSpec {
    pub fn array_size(&self) -> Option<u32> {
        self.commands.array_size()
    }

    pub fn is_array(&self) -> bool {
        self.commands.is_array()
    }

    /// Whether the job asks for a GPU-class generic resource
    pub fn requests_gpu(&self) -> bool {
        self.args
            .get("gres")
            .and_then(|value| value.as_str())
            .map(|gres| {
                gres.split(',')
                    .any(|resource| resource.trim().split(':').next() == Some("gpu"))
            })
            .unwrap_or(false)
    }

    /// Generated batch script location
    pub fn script_path(&self, job_id: JobId) -> PathBuf {
        self.working_dir.join(format!("herd-{}.sh", job_id))
    }

    /// Console output location of the job or one of its array elements
    pub fn output_path(&self, job_id: JobId, array_index: Option<u32>) -> PathBuf {
        match array_index {
            Some(index) => self.working_dir.join(format!("herd-{}_{}.out", job_id, index)),
            None => self.working_dir.join(format!("herd-{}.out", job_id)),
        }
    }
}

/// Persisted job entity
///
/// `id` is assigned by the store exactly once, on first persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: Option<JobId>,
    pub spec: JobSpec,
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl JobRecord {
    /// Creates a record that has not been persisted yet
    pub fn new(spec: JobSpec) -> Self {
        Self {
            id: None,
            spec,
            created_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec_with_args(args: &[(&str, serde_json::Value)]) -> JobSpec {
        JobSpec {
            container: None,
            commands: Commands::Script {
                commands: vec!["true".to_string()],
                array_size: None,
            },
            working_dir: PathBuf::from("/data/run"),
            env: BTreeMap::new(),
            args: args
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
            dependencies: vec![],
            owner_id: None,
            owner_listener_id: None,
            web_name: "test".to_string(),
            cluster_name: "test".to_string(),
        }
    }

    #[test]
    fn test_requests_gpu() {
        assert!(spec_with_args(&[("gres", serde_json::json!("gpu:2"))]).requests_gpu());
        assert!(spec_with_args(&[("gres", serde_json::json!("tmp:10G,gpu"))]).requests_gpu());
        assert!(!spec_with_args(&[("gres", serde_json::json!("tmp:10G"))]).requests_gpu());
        assert!(!spec_with_args(&[("partition", serde_json::json!("gpu"))]).requests_gpu());
    }

    #[test]
    fn test_paths() {
        let spec = spec_with_args(&[]);
        assert_eq!(spec.script_path(7), PathBuf::from("/data/run/herd-7.sh"));
        assert_eq!(spec.output_path(7, None), PathBuf::from("/data/run/herd-7.out"));
        assert_eq!(
            spec.output_path(7, Some(3)),
            PathBuf::from("/data/run/herd-7_3.out")
        );
    }
}
