//! Out-of-band failure signals

use serde::{Deserialize, Serialize};

use crate::domain::job::JobId;

/// A failure reported by something other than the job itself,
/// e.g. a liveness monitor.
///
/// Any entry recorded for a job forces its result to `Failure`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureEntry {
    pub job_id: JobId,
    /// `None` applies to every element of the job
    pub array_index: Option<u32>,
    pub message: String,
    pub recorded_at: chrono::DateTime<chrono::Utc>,
}

impl FailureEntry {
    pub fn new(job_id: JobId, array_index: Option<u32>, message: impl Into<String>) -> Self {
        Self {
            job_id,
            array_index,
            message: message.into(),
            recorded_at: chrono::Utc::now(),
        }
    }

    /// Whether this entry concerns the given array element
    pub fn applies_to(&self, array_index: Option<u32>) -> bool {
        self.array_index.is_none() || self.array_index == array_index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_wide_entry_applies_everywhere() {
        let entry = FailureEntry::new(1, None, "node lost");
        assert!(entry.applies_to(None));
        assert!(entry.applies_to(Some(3)));
    }

    #[test]
    fn test_element_entry_applies_to_its_index() {
        let entry = FailureEntry::new(1, Some(2), "oom");
        assert!(entry.applies_to(Some(2)));
        assert!(!entry.applies_to(Some(1)));
        assert!(!entry.applies_to(None));
    }
}
