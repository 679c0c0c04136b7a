//! Scheduler command execution
//!
//! Thin wrapper around `tokio::process` used to call the scheduler's
//! command-line tools and capture what they print.

use herd_core::backend::BackendError;
use tokio::process::Command;
use tracing::debug;

/// Captured output of a finished command
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// stdout and stderr joined, for storing as console text
    pub fn console(&self) -> String {
        match (self.stdout.trim().is_empty(), self.stderr.trim().is_empty()) {
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr.trim_end()),
            (false, true) => self.stdout.trim_end().to_string(),
            (true, false) => self.stderr.trim_end().to_string(),
            (true, true) => String::new(),
        }
    }
}

/// Runs `program args...` to completion
pub async fn run(program: &str, args: &[String]) -> Result<CommandOutput, BackendError> {
    debug!("Running {} {:?}", program, args);

    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| BackendError::Command(format!("failed to execute {}: {}", program, e)))?;

    let result = CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        exit_code: output.status.code().unwrap_or(-1),
    };

    if !result.stdout.trim().is_empty() {
        debug!("{} stdout: {}", program, result.stdout.trim());
    }
    if !result.stderr.trim().is_empty() {
        debug!("{} stderr: {}", program, result.stderr.trim());
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_console_joins_streams() {
        let output = CommandOutput {
            stdout: "Submitted\n".to_string(),
            stderr: "warning\n".to_string(),
            exit_code: 0,
        };
        assert_eq!(output.console(), "Submitted\nwarning");

        let empty = CommandOutput {
            stdout: String::new(),
            stderr: " \n".to_string(),
            exit_code: 1,
        };
        assert_eq!(empty.console(), "");
        assert!(!empty.success());
    }

    #[tokio::test]
    async fn test_run_captures_output() {
        let output = run("sh", &["-c".to_string(), "echo out; echo err >&2; exit 3".to_string()])
            .await
            .unwrap();
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
        assert_eq!(output.exit_code, 3);
    }

    #[tokio::test]
    async fn test_run_missing_program() {
        let result = run("herd-definitely-not-a-binary", &[]).await;
        assert!(matches!(result, Err(BackendError::Command(_))));
    }
}
