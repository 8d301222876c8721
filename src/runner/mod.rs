//! Test lifecycle: one shell per script, a send/expect DSL, and a
//! guaranteed teardown that turns whatever happened into one [`Outcome`].

mod outcome;

pub use outcome::{Failure, Outcome};

use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Context;
use nix::unistd::Pid;

use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};
use crate::expect::{self, Match, Pattern};
use crate::inspect::{self, ProcessSnapshot, RunState};
use crate::pty::{ExitStatus, PtySession};
use crate::retry::Settle;
use crate::signal::{JobSignal, SignalHandler};

/// What the shell printed when a job went to the background: `[jid] pgid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackgroundJob {
    pub id: u32,
    pub pgid: Pid,
}

/// A shell under test plus the state of the script driving it.
pub struct TestRun {
    name: String,
    session: PtySession,
    prompt: Pattern,
    timeout: Duration,
    settle: Settle,
    working_dir: PathBuf,
    home: Option<PathBuf>,
    passed: bool,
}

impl TestRun {
    /// Spawn the shell and wait for its first prompt.
    pub fn setup(name: &str, config: &HarnessConfig) -> Result<Self> {
        let prompt = Pattern::regex(&config.prompt)?;
        let session = PtySession::spawn(&config.spawn_options())?;

        let working_dir = match &config.working_dir {
            Some(dir) => dir.clone(),
            None => std::env::current_dir().map_err(|e| HarnessError::io("current directory", e))?,
        };
        let home = config
            .env_value("HOME")
            .map(PathBuf::from)
            .or_else(dirs::home_dir);

        let mut run = Self {
            name: name.to_string(),
            session,
            prompt,
            timeout: config.timeout,
            settle: config.settle(),
            working_dir,
            home,
            passed: false,
        };

        tracing::info!(script = name, pid = run.session.pid().as_raw(), "waiting for first prompt");
        expect::expect(&mut run.session, &run.prompt, config.startup_timeout)?;
        Ok(run)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn session(&self) -> &PtySession {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut PtySession {
        &mut self.session
    }

    pub fn shell_pid(&self) -> Pid {
        self.session.pid()
    }

    /// Directory the shell was started in.
    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// HOME as the shell sees it.
    pub fn home_dir(&self) -> Option<&Path> {
        self.home.as_deref()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn passed(&self) -> bool {
        self.passed
    }

    /// Mark the script as passed. Without this call the script fails.
    pub fn test_success(&mut self) {
        tracing::info!(script = %self.name, "script declared success");
        self.passed = true;
    }

    pub fn expect_prompt(&mut self) -> Result<Match> {
        expect::expect(&mut self.session, &self.prompt, self.timeout)
    }

    pub fn sendline(&mut self, line: &str) -> Result<()> {
        tracing::debug!(script = %self.name, line, "sendline");
        self.session.send_line(line)
    }

    /// Wait for a regex.
    pub fn expect(&mut self, pattern: &str) -> Result<Match> {
        let pattern = Pattern::regex(pattern)?;
        expect::expect(&mut self.session, &pattern, self.timeout)
    }

    /// Wait for exact text.
    pub fn expect_exact(&mut self, text: &str) -> Result<Match> {
        expect::expect(&mut self.session, &Pattern::literal(text), self.timeout)
    }

    pub fn expect_any(&mut self, patterns: &[Pattern]) -> Result<Match> {
        expect::expect_any(&mut self.session, patterns, self.timeout)
    }

    pub fn expect_with_timeout(&mut self, pattern: &Pattern, timeout: Duration) -> Result<Match> {
        expect::expect(&mut self.session, pattern, timeout)
    }

    pub fn sendcontrol(&mut self, key: char) -> Result<()> {
        self.session.send_control(key)
    }

    /// Type the control key the terminal turns into `signal` (`^C`, `^Z`, `^\`).
    pub fn send_signal_key(&mut self, signal: JobSignal) -> Result<()> {
        let key = signal.control_key().ok_or_else(|| {
            HarnessError::Io(format!("no terminal key raises {}", signal.signal().as_str()))
        })?;
        self.sendcontrol(key)
    }

    /// Type `^Z`.
    pub fn suspend(&mut self) -> Result<()> {
        self.send_signal_key(JobSignal::Suspend)
    }

    /// Type `^C`.
    pub fn interrupt(&mut self) -> Result<()> {
        self.send_signal_key(JobSignal::Interrupt)
    }

    pub fn signal_shell(&self, signal: JobSignal) -> Result<()> {
        self.session.signal(signal)
    }

    pub fn signal_group(&self, pgid: Pid, signal: JobSignal) -> Result<()> {
        self.session.signal_group(pgid, signal)
    }

    /// Wait for a `[jid] pgid` line.
    pub fn expect_bg_status(&mut self) -> Result<BackgroundJob> {
        let found = self.expect(r"\[(\d+)\]\s+(\d+)\s*\r?\n")?;
        let id = found.capture(1).and_then(|s| s.parse::<u32>().ok());
        let pgid = found.capture(2).and_then(|s| s.parse::<i32>().ok());
        match (id, pgid) {
            (Some(id), Some(pgid)) => Ok(BackgroundJob {
                id,
                pgid: Pid::from_raw(pgid),
            }),
            _ => Err(HarnessError::Inspect(format!(
                "malformed job status line {:?}",
                found.text
            ))),
        }
    }

    /// Wait for a `jobs` listing line such as `[1]  Running  (sleep 30)`.
    pub fn expect_job_line(&mut self, job: u32, status: &str, command: &str) -> Result<Match> {
        let pattern = format!(
            r"\[{job}\][+-]?\s+{}\s+\(?{}\)?",
            regex::escape(status),
            regex::escape(command)
        );
        self.expect(&pattern)
    }

    /// Wait until `pid` is in `state`.
    pub fn assert_run_state(&self, pid: Pid, state: RunState) -> Result<RunState> {
        inspect::wait_for_run_state(pid, state, &self.settle)
    }

    /// Wait until `pgid` owns the terminal.
    pub fn assert_foreground(&self, pgid: Pid) -> Result<()> {
        let terminal = self.session.terminal()?;
        inspect::wait_for_foreground(&terminal, pgid, &self.settle)
    }

    /// Wait until `pgid` does not own the terminal.
    pub fn assert_background(&self, pgid: Pid) -> Result<()> {
        let terminal = self.session.terminal()?;
        inspect::wait_for_background(&terminal, pgid, &self.settle).map(drop)
    }

    /// Wait until the shell has taken the terminal back.
    pub fn assert_shell_foreground(&self) -> Result<()> {
        self.assert_foreground(self.session.pgid())
    }

    /// Wait until the shell has exactly `count` live children.
    pub fn assert_child_count(&self, count: usize) -> Result<Vec<ProcessSnapshot>> {
        inspect::wait_for_child_count(self.session.pid(), count, &self.settle)
    }

    pub fn wait_exit(&mut self, timeout: Duration) -> Result<ExitStatus> {
        self.session.wait_exit(timeout)
    }

    fn teardown(&mut self) {
        self.session.terminate();
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Run `script` against a fresh shell and report how it went.
///
/// The shell is terminated before this returns, whether the script passed,
/// failed, forgot to call `test_success`, panicked or was interrupted.
pub fn run_script<F>(name: &str, config: &HarnessConfig, script: F) -> Outcome
where
    F: FnOnce(&mut TestRun) -> anyhow::Result<()>,
{
    let started = Instant::now();
    if let Err(e) = SignalHandler::new().setup() {
        tracing::warn!(error = %e, "could not install harness signal listener");
    }

    let result = panic::catch_unwind(AssertUnwindSafe(|| -> anyhow::Result<()> {
        let mut run = TestRun::setup(name, config).context("setup_tests failed")?;
        let result = script(&mut run);
        let passed = run.passed();
        run.teardown();
        result?;
        if !passed {
            return Err(HarnessError::ScriptIncomplete.into());
        }
        Ok(())
    }));

    let result = match result {
        Ok(result) => result,
        // The TestRun was dropped while unwinding, which terminated the shell
        Err(payload) => Err(HarnessError::ScriptPanicked {
            message: panic_message(payload.as_ref()),
        }
        .into()),
    };

    let outcome = Outcome::new(name, result, started.elapsed());
    if outcome.interrupted() {
        SignalHandler::new().reset();
    }
    match &outcome.failure {
        None => tracing::info!(script = name, "passed"),
        Some(failure) => tracing::info!(script = name, code = %failure.error_code, "failed"),
    }
    outcome
}
