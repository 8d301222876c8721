//! Conformance scripts bundled with the harness.
//!
//! Each script drives one shell feature through the [`TestRun`] DSL and
//! ends by exiting the shell and declaring success.

pub mod cd;
pub mod history;
pub mod jobs;

use anyhow::{Context, Result};
use strsim::jaro_winkler;

use crate::runner::TestRun;

/// A named script the CLI can run.
#[derive(Debug)]
pub struct Script {
    pub name: &'static str,
    pub description: &'static str,
    pub run: fn(&mut TestRun) -> Result<()>,
}

pub const SCRIPTS: &[Script] = &[
    Script {
        name: "cd",
        description: "cd into a new directory, back out, into a missing one and home",
        run: cd::run,
    },
    Script {
        name: "history",
        description: "history listing and !-N, !!, !prefix and !N expansion",
        run: history::run,
    },
    Script {
        name: "jobs",
        description: "background jobs, jobs listing, fg, ^Z, bg and ^C",
        run: jobs::run,
    },
];

/// Minimum Jaro-Winkler similarity for a "did you mean" suggestion
const SUGGEST_THRESHOLD: f64 = 0.7;

pub fn find(name: &str) -> Option<&'static Script> {
    SCRIPTS.iter().find(|s| s.name == name)
}

/// Closest script name to a misspelled one.
pub fn suggest(name: &str) -> Option<&'static str> {
    SCRIPTS
        .iter()
        .map(|s| (s.name, jaro_winkler(s.name, name)))
        .filter(|(_, score)| *score >= SUGGEST_THRESHOLD)
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(name, _)| name)
}

/// Regex for one complete output line holding exactly `text`.
///
/// The line must start after a newline, which keeps it from matching the
/// echo of the command that produced it. Some line editors emit a bare
/// `\r` before the output, hence the optional carriage returns.
pub(crate) fn output_line(text: &str) -> String {
    format!(r"\n\r*{}\r\n", regex::escape(text))
}

/// Exit the shell and check it leaves nothing behind.
pub(crate) fn exit_shell(run: &mut TestRun) -> Result<()> {
    run.sendline("exit")?;
    run.expect_exact("exit\r\n")
        .context("Shell output extraneous characters")?;
    let timeout = run.timeout();
    run.wait_exit(timeout).context("shell did not exit after `exit`")?;
    Ok(())
}
