//! Orchestrator configuration
//!
//! Server address, persistence, backend selection and rendering settings,
//! all read from the environment.

use herd_backend::{LoadTestConfig, LocalConfig, SlurmConfig};
use herd_core::domain::container::ContainerProfile;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Which execution backend the orchestrator drives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Slurm,
    Local,
    LoadTest,
}

impl FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "slurm" => Ok(BackendKind::Slurm),
            "local" => Ok(BackendKind::Local),
            "loadtest" | "load-test" => Ok(BackendKind::LoadTest),
            other => anyhow::bail!("unknown backend: {}", other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,

    /// Postgres URL; without it jobs live in memory only
    pub database_url: Option<String>,

    pub backend: BackendKind,

    /// Shared data root, bound into every container
    pub data_root: PathBuf,

    /// Sandbox binary used for container profiles
    pub container_runtime: String,

    pub container_profiles: HashMap<String, ContainerProfile>,

    /// Command SLURM scripts call to report started/ended
    pub notify_command: String,

    pub local_max_parallel: usize,

    pub loadtest_duration: Duration,

    /// Every n-th load-test element fails
    pub loadtest_fail_every: Option<u32>,
}

impl Config {
    /// Creates a new configuration with defaults
    pub fn new() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            database_url: None,
            backend: BackendKind::Local,
            data_root: PathBuf::from("/data"),
            container_runtime: "apptainer".to_string(),
            container_profiles: HashMap::new(),
            notify_command: "herd notify --url http://127.0.0.1:8080".to_string(),
            local_max_parallel: 2,
            loadtest_duration: Duration::from_millis(1000),
            loadtest_fail_every: None,
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables (all optional):
    /// - HERD_BIND_ADDR (default: 0.0.0.0:8080)
    /// - DATABASE_URL (default: in-memory store)
    /// - HERD_BACKEND (slurm, local or loadtest; default: local)
    /// - HERD_DATA_ROOT (default: /data)
    /// - HERD_CONTAINER_RUNTIME (default: apptainer)
    /// - HERD_CONTAINER_PROFILES (path to a JSON map of profiles)
    /// - HERD_NOTIFY_COMMAND (default: herd notify --url http://127.0.0.1:8080)
    /// - HERD_LOCAL_MAX_PARALLEL (default: 2)
    /// - HERD_LOADTEST_DURATION_MS (default: 1000)
    /// - HERD_LOADTEST_FAIL_EVERY (default: never)
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::new();

        let backend = match std::env::var("HERD_BACKEND") {
            Ok(value) => value.parse()?,
            Err(_) => defaults.backend,
        };

        let container_profiles = match std::env::var("HERD_CONTAINER_PROFILES") {
            Ok(path) => load_profiles(Path::new(&path))?,
            Err(_) => HashMap::new(),
        };

        let local_max_parallel = std::env::var("HERD_LOCAL_MAX_PARALLEL")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(defaults.local_max_parallel);

        let loadtest_duration = std::env::var("HERD_LOADTEST_DURATION_MS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.loadtest_duration);

        let loadtest_fail_every = std::env::var("HERD_LOADTEST_FAIL_EVERY")
            .ok()
            .and_then(|s| s.parse::<u32>().ok());

        Ok(Self {
            bind_addr: std::env::var("HERD_BIND_ADDR").unwrap_or(defaults.bind_addr),
            database_url: std::env::var("DATABASE_URL").ok(),
            backend,
            data_root: std::env::var("HERD_DATA_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_root),
            container_runtime: std::env::var("HERD_CONTAINER_RUNTIME")
                .unwrap_or(defaults.container_runtime),
            container_profiles,
            notify_command: std::env::var("HERD_NOTIFY_COMMAND").unwrap_or(defaults.notify_command),
            local_max_parallel,
            loadtest_duration,
            loadtest_fail_every,
        })
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.bind_addr.is_empty() {
            anyhow::bail!("bind_addr cannot be empty");
        }

        if !self.data_root.is_absolute() {
            anyhow::bail!("data_root must be an absolute path");
        }

        if self.container_runtime.trim().is_empty() {
            anyhow::bail!("container_runtime cannot be empty");
        }

        for (name, profile) in &self.container_profiles {
            if !profile.image.is_absolute() {
                anyhow::bail!("container profile {} needs an absolute image path", name);
            }
        }

        match self.backend {
            BackendKind::Slurm => self.slurm_config().validate(),
            BackendKind::Local => self.local_config().validate(),
            BackendKind::LoadTest => self.loadtest_config().validate(),
        }
        .map_err(|e| anyhow::anyhow!(e))
    }

    pub fn slurm_config(&self) -> SlurmConfig {
        SlurmConfig::new(self.notify_command.clone())
    }

    pub fn local_config(&self) -> LocalConfig {
        LocalConfig {
            max_parallel_jobs: self.local_max_parallel,
            ..LocalConfig::default()
        }
    }

    pub fn loadtest_config(&self) -> LoadTestConfig {
        LoadTestConfig {
            element_duration: self.loadtest_duration,
            fail_every: self.loadtest_fail_every,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

/// Reads a JSON object of container profiles keyed by profile id
pub fn load_profiles(path: &Path) -> anyhow::Result<HashMap<String, ContainerProfile>> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {}", path.display(), e))?;
    let profiles = serde_json::from_str(&contents)
        .map_err(|e| anyhow::anyhow!("invalid container profiles in {}: {}", path.display(), e))?;
    Ok(profiles)
}
