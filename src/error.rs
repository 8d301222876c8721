//! Structured error types for shprobe
//!
//! Every way a test script can fail maps onto one [`HarnessError`] variant.
//! Variants that come from waiting on the shell carry both the literal
//! expectation and the literal text that was observed, so a failed run can
//! be diagnosed from its report alone.

use std::time::Duration;

use crate::pty::ExitStatus;

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, HarnessError>;

/// Errors raised by the pty session, the matcher, the inspector and the runner.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// The shell could not be started or no terminal could be allocated.
    #[error("failed to spawn {program}: {reason}")]
    Spawn { program: String, reason: String },

    /// Reading from or writing to the terminal failed, or the session is dead.
    #[error("terminal I/O failed: {0}")]
    Io(String),

    /// The expected output did not appear in time.
    #[error("timed out after {elapsed:.2?} waiting for {expected}")]
    MatchTimeout {
        expected: String,
        observed: String,
        elapsed: Duration,
    },

    /// The shell terminated before the expected output appeared.
    #[error("shell {status} while waiting for {expected}")]
    UnexpectedExit {
        expected: String,
        observed: String,
        status: ExitStatus,
    },

    /// A job-control state never reached its expected value.
    #[error("process state did not settle within {elapsed:.2?}: expected {expected}, last saw {observed}")]
    ProcessStateTimeout {
        expected: String,
        observed: String,
        elapsed: Duration,
    },

    /// `wait_exit` ran out of time.
    #[error("shell still running after {elapsed:.2?}")]
    ExitTimeout { elapsed: Duration },

    /// A regex handed to the matcher did not compile.
    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// Process state could not be read from the OS.
    #[error("process inspection failed: {0}")]
    Inspect(String),

    /// The harness itself received SIGINT, SIGTERM or SIGHUP.
    #[error("interrupted by signal {signal}")]
    Interrupted { signal: i32 },

    /// The script returned without calling `test_success`.
    #[error("script ended without declaring success")]
    ScriptIncomplete,

    /// The script panicked.
    #[error("script panicked: {message}")]
    ScriptPanicked { message: String },
}

impl HarnessError {
    /// Stable identifier used in reports and JSON output.
    pub fn error_code(&self) -> &'static str {
        match self {
            HarnessError::Spawn { .. } => "SPAWN_ERROR",
            HarnessError::Io(_) => "IO_ERROR",
            HarnessError::MatchTimeout { .. } => "MATCH_TIMEOUT",
            HarnessError::UnexpectedExit { .. } => "UNEXPECTED_EXIT",
            HarnessError::ProcessStateTimeout { .. } => "PROCESS_STATE_TIMEOUT",
            HarnessError::ExitTimeout { .. } => "EXIT_TIMEOUT",
            HarnessError::Pattern(_) => "INVALID_PATTERN",
            HarnessError::Inspect(_) => "INSPECT_ERROR",
            HarnessError::Interrupted { .. } => "INTERRUPTED",
            HarnessError::ScriptIncomplete => "SCRIPT_INCOMPLETE",
            HarnessError::ScriptPanicked { .. } => "SCRIPT_PANICKED",
        }
    }

    /// Process exit code for a run that ended with this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            HarnessError::Interrupted { signal } => 128 + signal,
            _ => 1,
        }
    }

    /// The literal expectation, for errors raised while waiting.
    pub fn expected(&self) -> Option<&str> {
        match self {
            HarnessError::MatchTimeout { expected, .. }
            | HarnessError::UnexpectedExit { expected, .. }
            | HarnessError::ProcessStateTimeout { expected, .. } => Some(expected),
            _ => None,
        }
    }

    /// The literal text or state observed when the wait gave up.
    pub fn observed(&self) -> Option<&str> {
        match self {
            HarnessError::MatchTimeout { observed, .. }
            | HarnessError::UnexpectedExit { observed, .. }
            | HarnessError::ProcessStateTimeout { observed, .. } => Some(observed),
            _ => None,
        }
    }

    pub(crate) fn io(context: &str, err: impl std::fmt::Display) -> Self {
        HarnessError::Io(format!("{context}: {err}"))
    }
}
