// Library interface for shprobe
// The binary, the integration tests and custom test scripts all drive shells through these modules

pub mod config;
pub mod error;
pub mod expect;
pub mod inspect;
pub mod pty;
pub mod report;
pub mod retry;
pub mod runner;
pub mod scripts;
pub mod signal;
pub mod terminal;

pub use config::HarnessConfig;
pub use error::{HarnessError, Result};
pub use expect::{Match, Pattern};
pub use inspect::RunState;
pub use pty::{ExitStatus, PtySession, SpawnOptions};
pub use runner::{run_script, Outcome, TestRun};
