//! Final job results

use serde::{Deserialize, Serialize};
use std::fmt;

/// Final outcome category of a job or array element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResultType {
    Success,
    Failure,
    Canceled,
}

impl fmt::Display for ResultType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResultType::Success => "Success",
            ResultType::Failure => "Failure",
            ResultType::Canceled => "Canceled",
        };
        f.write_str(name)
    }
}

/// Result of a job or array element
///
/// Once the type is `Failure` or `Canceled` it never goes back to `Success`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    pub result_type: ResultType,
    /// Captured console output
    pub output: String,
    pub cancel_reason: Option<String>,
    pub exit_code: Option<i32>,
}

impl JobResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            result_type: ResultType::Success,
            output: output.into(),
            cancel_reason: None,
            exit_code: None,
        }
    }

    pub fn failure(output: impl Into<String>) -> Self {
        Self {
            result_type: ResultType::Failure,
            output: output.into(),
            cancel_reason: None,
            exit_code: None,
        }
    }

    pub fn canceled(reason: impl Into<String>) -> Self {
        Self {
            result_type: ResultType::Canceled,
            output: String::new(),
            cancel_reason: Some(reason.into()),
            exit_code: None,
        }
    }

    /// Records the process exit code.
    ///
    /// A nonzero code turns `Success` into `Failure`; other types are kept.
    pub fn apply_exit_code(&mut self, exit_code: i32) {
        self.exit_code = Some(exit_code);
        if exit_code != 0 && self.result_type == ResultType::Success {
            self.result_type = ResultType::Failure;
        }
    }

    /// Forces `Failure` because an out-of-band failure was recorded
    pub fn force_failure(&mut self) {
        self.result_type = ResultType::Failure;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nonzero_exit_code_fails_success() {
        let mut result = JobResult::success("done");
        result.apply_exit_code(2);
        assert_eq!(result.result_type, ResultType::Failure);
        assert_eq!(result.exit_code, Some(2));
    }

    #[test]
    fn test_zero_exit_code_never_upgrades() {
        let mut failed = JobResult::failure("boom");
        failed.apply_exit_code(0);
        assert_eq!(failed.result_type, ResultType::Failure);
        assert_eq!(failed.exit_code, Some(0));

        let mut canceled = JobResult::canceled("user");
        canceled.apply_exit_code(0);
        assert_eq!(canceled.result_type, ResultType::Canceled);
    }

    #[test]
    fn test_nonzero_exit_code_keeps_canceled() {
        let mut canceled = JobResult::canceled("user");
        canceled.apply_exit_code(137);
        assert_eq!(canceled.result_type, ResultType::Canceled);
        assert_eq!(canceled.exit_code, Some(137));
    }

    #[test]
    fn test_force_failure() {
        let mut result = JobResult::success("");
        result.force_failure();
        assert_eq!(result.result_type, ResultType::Failure);
    }
}
