//! Container profiles

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Sandbox configuration a job can opt into by profile id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerProfile {
    /// Sandbox image on the shared filesystem
    pub image: PathBuf,
    /// Extra paths bound into the sandbox
    #[serde(default)]
    pub binds: Vec<String>,
    /// Shell lines run on the host before entering the sandbox
    #[serde(default)]
    pub prelaunch: Vec<String>,
}
