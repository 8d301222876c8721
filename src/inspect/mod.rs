//! Process state inspection.
//!
//! Reads what the OS knows about a process: whether it runs, is stopped or
//! has exited, which process group and session it belongs to and which
//! group owns its controlling terminal. Linux reads `/proc/<pid>/stat`;
//! other Unix systems ask `ps`.

use std::collections::HashMap;
use std::fmt;

use nix::unistd::Pid;

use crate::error::{HarnessError, Result};
use crate::retry::{Probe, Settle};
use crate::terminal::ControllingTerminal;

#[cfg(target_os = "linux")]
mod procfs;
#[cfg(not(target_os = "linux"))]
mod ps;

mod parse;

#[cfg(target_os = "linux")]
use self::procfs as source;
#[cfg(not(target_os = "linux"))]
use self::ps as source;

pub use parse::{parse_ps_line, parse_stat};

/// Job-control view of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunState {
    /// Running or sleeping; anything that will make progress once scheduled.
    Running,
    /// Stopped by a signal or by a tracer.
    Stopped,
    /// Exited but not yet reaped by its parent.
    Zombie,
    /// No such process.
    Gone,
}

impl RunState {
    /// Map a `ps`/procfs state letter.
    pub fn from_code(code: char) -> Self {
        match code {
            'T' | 't' => RunState::Stopped,
            'Z' => RunState::Zombie,
            'X' | 'x' => RunState::Gone,
            _ => RunState::Running,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Running => "running",
            RunState::Stopped => "stopped",
            RunState::Zombie => "zombie",
            RunState::Gone => "gone",
        };
        f.write_str(name)
    }
}

/// A point-in-time view of one process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSnapshot {
    pub pid: Pid,
    pub ppid: Pid,
    pub pgid: Pid,
    pub sid: Pid,
    /// Foreground group of the process's controlling terminal, if it has one
    pub tpgid: Option<Pid>,
    pub state: RunState,
    pub command: String,
}

impl ProcessSnapshot {
    /// True when the process's group owns its controlling terminal.
    pub fn is_foreground(&self) -> bool {
        self.tpgid == Some(self.pgid)
    }
}

impl fmt::Display for ProcessSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) {} pgid={}",
            self.pid, self.command, self.state, self.pgid
        )
    }
}

/// Snapshot of `pid`, or `None` if no such process exists.
pub fn snapshot(pid: Pid) -> Result<Option<ProcessSnapshot>> {
    source::snapshot(pid)
}

/// Every visible process.
pub fn all_processes() -> Result<Vec<ProcessSnapshot>> {
    source::all_processes()
}

/// Run state of `pid`; a missing process is [`RunState::Gone`].
pub fn run_state(pid: Pid) -> Result<RunState> {
    Ok(snapshot(pid)?.map_or(RunState::Gone, |snap| snap.state))
}

/// Direct children of `pid`, ordered by pid.
pub fn children(pid: Pid) -> Result<Vec<ProcessSnapshot>> {
    let mut kids: Vec<_> = all_processes()?
        .into_iter()
        .filter(|p| p.ppid == pid)
        .collect();
    kids.sort_by_key(|p| p.pid.as_raw());
    Ok(kids)
}

/// All descendants of `pid`, parents before their children.
pub fn descendants(pid: Pid) -> Result<Vec<ProcessSnapshot>> {
    Ok(collect_descendants(pid, all_processes()?))
}

pub(crate) fn collect_descendants(root: Pid, procs: Vec<ProcessSnapshot>) -> Vec<ProcessSnapshot> {
    let mut by_parent: HashMap<Pid, Vec<ProcessSnapshot>> = HashMap::new();
    for process in procs {
        by_parent.entry(process.ppid).or_default().push(process);
    }

    let mut found = Vec::new();
    let mut frontier = vec![root];
    while let Some(parent) = frontier.pop() {
        if let Some(mut kids) = by_parent.remove(&parent) {
            kids.sort_by_key(|p| p.pid.as_raw());
            frontier.extend(kids.iter().map(|p| p.pid));
            found.extend(kids);
        }
    }
    found
}

/// Wait until `pid` reaches `expected`.
pub fn wait_for_run_state(pid: Pid, expected: RunState, settle: &Settle) -> Result<RunState> {
    settle.until(&format!("process {pid} {expected}"), || {
        let state = run_state(pid)?;
        Ok(if state == expected {
            Probe::Ready(state)
        } else {
            Probe::Pending(format!("process {pid} {state}"))
        })
    })
}

/// Wait until `pgid` owns the terminal.
pub fn wait_for_foreground(terminal: &ControllingTerminal<'_>, pgid: Pid, settle: &Settle) -> Result<()> {
    settle.until(&format!("foreground group {pgid}"), || {
        let current = terminal.foreground_group()?;
        Ok(if current == pgid {
            Probe::Ready(())
        } else {
            Probe::Pending(format!("foreground group {current}"))
        })
    })
}

/// Wait until some group other than `pgid` owns the terminal.
pub fn wait_for_background(terminal: &ControllingTerminal<'_>, pgid: Pid, settle: &Settle) -> Result<Pid> {
    settle.until(&format!("group {pgid} in the background"), || {
        let current = terminal.foreground_group()?;
        Ok(if current != pgid {
            Probe::Ready(current)
        } else {
            Probe::Pending(format!("group {pgid} in the foreground"))
        })
    })
}

/// Wait until `pid` has exactly `count` live children.
///
/// Zombies are not counted: a reaped-but-unreported child is the shell's
/// business, not a leak.
pub fn wait_for_child_count(pid: Pid, count: usize, settle: &Settle) -> Result<Vec<ProcessSnapshot>> {
    settle.until(&format!("{count} children of {pid}"), || {
        let kids: Vec<_> = children(pid)?
            .into_iter()
            .filter(|p| p.state != RunState::Zombie)
            .collect();
        Ok(if kids.len() == count {
            Probe::Ready(kids)
        } else {
            let listing: Vec<String> = kids.iter().map(ToString::to_string).collect();
            Probe::Pending(format!("{} children [{}]", kids.len(), listing.join(", ")))
        })
    })
}

pub(crate) fn inspect_error(context: &str, err: impl fmt::Display) -> HarnessError {
    HarnessError::Inspect(format!("{context}: {err}"))
}
