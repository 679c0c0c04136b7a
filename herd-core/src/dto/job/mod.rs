//! Job DTOs

use serde::{Deserialize, Serialize};

use crate::domain::job::{JobId, JobRecord};
use crate::domain::log::JobLog;

/// Response to a submission; `id` is `None` when nothing was queued
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub id: Option<JobId>,
}

/// A job record together with its parent log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobView {
    pub record: JobRecord,
    pub log: JobLog,
}

/// Started callback
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartedNotice {
    #[serde(default)]
    pub array_index: Option<u32>,
}

/// Ended callback
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndedNotice {
    #[serde(default)]
    pub array_index: Option<u32>,
    #[serde(default)]
    pub exit_code: Option<i32>,
}

/// Out-of-band failure report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureReport {
    #[serde(default)]
    pub array_index: Option<u32>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitingReason {
    pub reason: Option<String>,
}

/// Query string selecting one array element
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArrayIndexQuery {
    #[serde(default)]
    pub array_index: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notices_default_to_no_index() {
        let started: StartedNotice = serde_json::from_str("{}").unwrap();
        assert_eq!(started.array_index, None);

        let ended: EndedNotice = serde_json::from_str(r#"{"exit_code": 3}"#).unwrap();
        assert_eq!(ended.array_index, None);
        assert_eq!(ended.exit_code, Some(3));
    }
}
