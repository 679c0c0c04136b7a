//! Herd Backends
//!
//! Execution backends implementing [`herd_core::backend::BackendPort`]:
//! - [`SlurmBackend`]: a real SLURM cluster driven through its CLI tools
//! - [`LocalBackend`]: a pseudo-cluster of local child processes
//! - [`LoadTestBackend`]: synthetic jobs for exercising the orchestrator
//!
//! The local and load-test backends observe their own jobs and report
//! lifecycle events over a channel; SLURM jobs report back through the
//! notify command embedded in their scripts.

pub mod config;
pub mod loadtest;
pub mod local;
mod process;
pub mod slurm;
mod staging;

pub use config::{LoadTestConfig, LocalConfig, SlurmConfig};
pub use loadtest::LoadTestBackend;
pub use local::LocalBackend;
pub use slurm::SlurmBackend;
