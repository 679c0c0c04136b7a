//! Backend configuration
//!
//! Tunables for each execution backend. The orchestrator builds these from
//! its own configuration and hands them to the backend it selects.

use std::time::Duration;

/// SLURM backend settings
#[derive(Debug, Clone)]
pub struct SlurmConfig {
    /// Command generated scripts call to report started/ended
    pub notify_command: String,
    pub sbatch: String,
    pub scancel: String,
    pub squeue: String,
    pub sacct: String,
}

impl SlurmConfig {
    pub fn new(notify_command: String) -> Self {
        Self {
            notify_command,
            sbatch: "sbatch".to_string(),
            scancel: "scancel".to_string(),
            squeue: "squeue".to_string(),
            sacct: "sacct".to_string(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.notify_command.trim().is_empty() {
            return Err("notify_command cannot be empty".to_string());
        }
        for (name, binary) in [
            ("sbatch", &self.sbatch),
            ("scancel", &self.scancel),
            ("squeue", &self.squeue),
            ("sacct", &self.sacct),
        ] {
            if binary.trim().is_empty() {
                return Err(format!("{} binary cannot be empty", name));
            }
        }
        Ok(())
    }
}

/// Local pseudo-cluster settings
#[derive(Debug, Clone)]
pub struct LocalConfig {
    /// Max array elements / jobs running at once
    pub max_parallel_jobs: usize,
    pub shell: String,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            max_parallel_jobs: 2,
            shell: "bash".to_string(),
        }
    }
}

impl LocalConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_parallel_jobs == 0 {
            return Err("max_parallel_jobs must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Load-test backend settings
#[derive(Debug, Clone)]
pub struct LoadTestConfig {
    /// How long each synthetic element "runs"
    pub element_duration: Duration,
    /// Every n-th element exits with code 1
    pub fail_every: Option<u32>,
}

impl Default for LoadTestConfig {
    fn default() -> Self {
        Self {
            element_duration: Duration::from_millis(1000),
            fail_every: None,
        }
    }
}

impl LoadTestConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.fail_every == Some(0) {
            return Err("fail_every must be greater than 0".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_configs_are_valid() {
        assert!(SlurmConfig::new("herd notify".to_string()).validate().is_ok());
        assert!(LocalConfig::default().validate().is_ok());
        assert!(LoadTestConfig::default().validate().is_ok());
    }

    #[test]
    fn test_slurm_validation() {
        let mut config = SlurmConfig::new(String::new());
        assert!(config.validate().is_err());

        config.notify_command = "herd notify".to_string();
        config.sacct = " ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_parallelism_rejected() {
        let config = LocalConfig {
            max_parallel_jobs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_fail_every_rejected() {
        let config = LoadTestConfig {
            fail_every: Some(0),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
