//! Persisted job logs

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::domain::job::JobId;
use crate::domain::result::{JobResult, ResultType};
use crate::domain::status::Status;

/// One append-only history entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub status: Status,
    pub at: chrono::DateTime<chrono::Utc>,
}

impl HistoryEntry {
    pub fn now(status: Status) -> Self {
        Self {
            status,
            at: chrono::Utc::now(),
        }
    }
}

/// What the backend handed back after queueing a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchResult {
    /// Backend-native job id
    pub native_id: String,
    /// Console output of the launch command
    pub output: String,
    /// Extra files to delete once the job has ended
    #[serde(default)]
    pub cleanup: Vec<PathBuf>,
}

/// Per-element counters of an array job
///
/// `num_ended <= array size` and `num_canceled + num_failed <= num_ended`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrayProgress {
    pub num_started: u32,
    pub num_ended: u32,
    pub num_canceled: u32,
    pub num_failed: u32,
}

impl ArrayProgress {
    /// Result type of the whole array
    pub fn aggregate(&self) -> ResultType {
        if self.num_failed > 0 {
            ResultType::Failure
        } else if self.num_canceled > 0 {
            ResultType::Canceled
        } else {
            ResultType::Success
        }
    }
}

/// Lifecycle log of a job (`array_index == None`) or of one array element
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobLog {
    pub job_id: JobId,
    pub array_index: Option<u32>,
    pub history: Vec<HistoryEntry>,
    pub launch: Option<LaunchResult>,
    pub result: Option<JobResult>,
    /// Only present on the parent log of an array job
    pub progress: Option<ArrayProgress>,
}

impl JobLog {
    pub fn new(job_id: JobId, array_index: Option<u32>) -> Self {
        Self {
            job_id,
            array_index,
            history: Vec::new(),
            launch: None,
            result: None,
            progress: None,
        }
    }

    /// Current status: the status of the last history entry
    pub fn status(&self) -> Option<Status> {
        self.history.last().map(|entry| entry.status)
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_some_and(Status::is_terminal)
    }

    pub fn has_seen(&self, status: Status) -> bool {
        self.history.iter().any(|entry| entry.status == status)
    }

    /// Time of the most recent transition
    pub fn last_transition(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.history.last().map(|entry| entry.at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_is_last_entry() {
        let mut log = JobLog::new(1, None);
        assert_eq!(log.status(), None);

        log.history.push(HistoryEntry::now(Status::Submitted));
        log.history.push(HistoryEntry::now(Status::Launched));
        assert_eq!(log.status(), Some(Status::Launched));
        assert!(!log.is_terminal());

        log.history.push(HistoryEntry::now(Status::Ended));
        assert!(log.is_terminal());
        assert!(log.has_seen(Status::Submitted));
        assert!(!log.has_seen(Status::Canceling));
    }

    #[test]
    fn test_aggregate() {
        let mut progress = ArrayProgress {
            num_started: 3,
            num_ended: 3,
            ..Default::default()
        };
        assert_eq!(progress.aggregate(), ResultType::Success);

        progress.num_canceled = 1;
        assert_eq!(progress.aggregate(), ResultType::Canceled);

        progress.num_failed = 1;
        assert_eq!(progress.aggregate(), ResultType::Failure);
    }
}
