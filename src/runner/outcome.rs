use std::time::Duration;

use serde::Serialize;

use crate::error::HarnessError;

/// Why a script failed.
#[derive(Debug, Clone, Serialize)]
pub struct Failure {
    /// Error code category, e.g. `MATCH_TIMEOUT`
    pub error_code: String,
    /// The full error chain, outermost context first
    pub message: String,
    /// Literal expectation that was not met
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    /// Literal output or process state seen instead
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed: Option<String>,
}

impl Failure {
    /// Build a failure from a script error, digging the harness error out of
    /// any context the script wrapped around it.
    pub fn from_error(err: &anyhow::Error) -> (Self, i32) {
        let root = err.chain().find_map(|e| e.downcast_ref::<HarnessError>());
        let failure = Self {
            error_code: root.map_or("SCRIPT_ERROR", HarnessError::error_code).to_string(),
            message: format!("{err:#}"),
            expected: root.and_then(HarnessError::expected).map(str::to_string),
            observed: root.and_then(HarnessError::observed).map(str::to_string),
        };
        (failure, root.map_or(1, HarnessError::exit_code))
    }
}

/// The result of one script.
#[derive(Debug, Clone, Serialize)]
pub struct Outcome {
    pub script: String,
    pub passed: bool,
    /// Process exit status this outcome maps to
    pub exit_code: i32,
    pub elapsed_ms: u64,
    /// RFC 3339 time the script finished
    pub finished_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<Failure>,
}

impl Outcome {
    pub fn new(script: &str, result: anyhow::Result<()>, elapsed: Duration) -> Self {
        let (failure, exit_code) = match &result {
            Ok(()) => (None, 0),
            Err(err) => {
                let (failure, code) = Failure::from_error(err);
                (Some(failure), code)
            }
        };
        Self {
            script: script.to_string(),
            passed: failure.is_none(),
            exit_code,
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            finished_at: chrono::Local::now().to_rfc3339(),
            failure,
        }
    }

    /// Whether the script was cut short by a signal to the harness.
    pub fn interrupted(&self) -> bool {
        self.failure
            .as_ref()
            .is_some_and(|f| f.error_code == "INTERRUPTED")
    }

    /// Format outcome as JSON string
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                r#"{{"script":"{}","passed":{},"exit_code":{}}}"#,
                self.script, self.passed, self.exit_code
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_success_outcome() {
        let outcome = Outcome::new("cd", Ok(()), Duration::from_millis(1500));
        assert!(outcome.passed);
        assert_eq!(outcome.exit_code, 0);
        assert_eq!(outcome.elapsed_ms, 1500);
        assert!(outcome.failure.is_none());
        assert!(!outcome.to_json().contains("failure"));
    }

    #[test]
    fn test_harness_error_found_under_context() {
        let err = Err::<(), _>(HarnessError::MatchTimeout {
            expected: "literal \"never\"".into(),
            observed: "echo nevr\r\n".into(),
            elapsed: Duration::from_secs(5),
        })
        .context("could not execute command 'echo never'")
        .unwrap_err();

        let outcome = Outcome::new("history", Err(err), Duration::ZERO);
        assert!(!outcome.passed);
        assert_eq!(outcome.exit_code, 1);
        let failure = outcome.failure.as_ref().unwrap();
        assert_eq!(failure.error_code, "MATCH_TIMEOUT");
        assert!(failure.message.starts_with("could not execute command 'echo never': timed out"));
        assert_eq!(failure.expected.as_deref(), Some("literal \"never\""));
        assert_eq!(failure.observed.as_deref(), Some("echo nevr\r\n"));
    }

    #[test]
    fn test_interrupt_maps_to_signal_exit_code() {
        let err = anyhow::Error::from(HarnessError::Interrupted { signal: 2 });
        let outcome = Outcome::new("jobs", Err(err), Duration::ZERO);
        assert_eq!(outcome.exit_code, 130);
        assert!(outcome.interrupted());
        assert_eq!(outcome.failure.unwrap().error_code, "INTERRUPTED");
    }

    #[test]
    fn test_plain_anyhow_error() {
        let outcome = Outcome::new("x", Err(anyhow::anyhow!("cwd vanished")), Duration::ZERO);
        let failure = outcome.failure.unwrap();
        assert_eq!(failure.error_code, "SCRIPT_ERROR");
        assert_eq!(failure.message, "cwd vanished");
        assert_eq!(outcome.exit_code, 1);
    }

    #[test]
    fn test_json_shape() {
        let err = anyhow::Error::from(HarnessError::ScriptIncomplete);
        let outcome = Outcome::new("cd", Err(err), Duration::from_millis(3));
        let value: serde_json::Value = serde_json::from_str(&outcome.to_json()).unwrap();
        assert_eq!(value["script"], "cd");
        assert_eq!(value["passed"], false);
        assert_eq!(value["failure"]["error_code"], "SCRIPT_INCOMPLETE");
        assert!(value["failure"].get("observed").is_none());
        assert!(value["finished_at"].as_str().unwrap().contains('T'));
    }
}
