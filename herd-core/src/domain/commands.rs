//! Command lists a job executes

use serde::{Deserialize, Serialize};

/// What a job runs once it reaches a compute node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Commands {
    /// One command list, optionally re-run `array_size` times.
    ///
    /// Array elements only differ by the array-index environment value.
    Script {
        commands: Vec<String>,
        #[serde(default)]
        array_size: Option<u32>,
    },
    /// One command group per array index, selected at runtime
    Grid { groups: Vec<Vec<String>> },
}

impl Commands {
    /// Number of array elements, or `None` for a plain job
    pub fn array_size(&self) -> Option<u32> {
        match self {
            Commands::Script { array_size, .. } => *array_size,
            Commands::Grid { groups } => Some(u32::try_from(groups.len()).unwrap_or(u32::MAX)),
        }
    }

    pub fn is_array(&self) -> bool {
        self.array_size().is_some()
    }
}
