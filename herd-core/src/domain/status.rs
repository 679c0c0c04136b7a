//! Job lifecycle status

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a job or array element
///
/// `Submitted → Launched → Started → Ended` is the happy path. Any
/// non-terminal status can move to `Canceling`, which ends in `Ended`
/// or, after a second cancel attempt, `Abandoned`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    Submitted,
    Launched,
    Started,
    Canceling,
    Ended,
    Abandoned,
}

impl Status {
    /// No further transitions happen from a terminal status
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Ended | Status::Abandoned)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Submitted => "Submitted",
            Status::Launched => "Launched",
            Status::Started => "Started",
            Status::Canceling => "Canceling",
            Status::Ended => "Ended",
            Status::Abandoned => "Abandoned",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of canceling every job of an owner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancelOutcome {
    /// The owner has no jobs
    UnknownJob,
    /// At least one job is still running and will report its end later
    CancelRequested,
    /// Every job was finalized during the cancel pass
    AllCanceled,
}
