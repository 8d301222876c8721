//! Pseudo-terminal sessions for the shell under test.
//!
//! [`PtySession`] owns the child process, the master side of its terminal
//! and everything the child has printed so far. The child runs as a session
//! leader with the pty slave as its controlling terminal, so its process
//! group id equals its pid and the kernel's job-control machinery (terminal
//! foreground group, `^Z`/`^C` signal generation) behaves the way it does
//! for a shell started from a real terminal.

mod buffer;
mod escape;

pub use buffer::OutputBuffer;
pub use escape::EscapeFilter;

use std::env;
use std::ffi::{CString, OsStr, OsString};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::os::fd::{AsFd, AsRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, FdFlag, OFlag};
use nix::poll::{PollFd, PollFlags, PollTimeout};
use nix::pty::{openpty, Winsize};
use nix::sys::signal::{killpg, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{self, getpgrp, ForkResult, Pid};

use crate::error::{HarnessError, Result};
use crate::inspect;
use crate::signal::{pending_signal, JobSignal};
use crate::terminal::ControllingTerminal;

/// Upper bound on a single sleep inside `wait_exit`.
const EXIT_POLL: Duration = Duration::from_millis(20);

/// How long `terminate` waits for the kernel to hand back a killed child.
const REAP_TIMEOUT: Duration = Duration::from_secs(2);

/// Options for spawning a shell in a pty.
#[derive(Debug, Clone)]
pub struct SpawnOptions {
    /// Program to run, either a path or a name looked up in `PATH`.
    pub program: String,
    pub args: Vec<String>,
    /// Working directory of the child; inherited when `None`.
    pub working_dir: Option<PathBuf>,
    /// Variables added to (or replacing) the inherited environment.
    pub env: Vec<(String, String)>,
    pub rows: u16,
    pub cols: u16,
    /// Remove terminal escape sequences from the output before buffering.
    pub strip_escapes: bool,
    /// Time between SIGTERM and SIGKILL in `terminate`.
    pub kill_grace: Duration,
    /// Appended by `send_line`.
    pub line_terminator: String,
}

impl SpawnOptions {
    pub fn new(program: impl Into<String>, args: &[String]) -> Self {
        Self {
            program: program.into(),
            args: args.to_vec(),
            ..Self::default()
        }
    }
}

impl Default for SpawnOptions {
    fn default() -> Self {
        Self {
            program: String::new(),
            args: Vec::new(),
            working_dir: None,
            env: Vec::new(),
            rows: 24,
            cols: 80,
            strip_escapes: true,
            kill_grace: Duration::from_millis(250),
            line_terminator: "\n".to_string(),
        }
    }
}

/// How the shell terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Exited(i32),
    Signaled(Signal),
}

impl ExitStatus {
    /// Shell-style status: the exit code, or 128 + signal number.
    pub fn code(&self) -> i32 {
        match self {
            ExitStatus::Exited(code) => *code,
            ExitStatus::Signaled(sig) => 128 + *sig as i32,
        }
    }

    pub fn success(&self) -> bool {
        matches!(self, ExitStatus::Exited(0))
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitStatus::Exited(code) => write!(f, "exited with status {code}"),
            ExitStatus::Signaled(sig) => write!(f, "was killed by {}", sig.as_str()),
        }
    }
}

/// The C strings `execve` needs, built before `fork`.
struct ExecPlan {
    path: CString,
    argv: Vec<CString>,
    envp: Vec<CString>,
    working_dir: Option<CString>,
}

impl ExecPlan {
    fn build(opts: &SpawnOptions) -> std::result::Result<Self, String> {
        let mut vars: Vec<(OsString, OsString)> = env::vars_os().collect();
        for (key, value) in &opts.env {
            vars.retain(|(k, _)| k.as_os_str() != OsStr::new(key));
            vars.push((key.into(), value.into()));
        }

        let search_path = vars
            .iter()
            .find(|(k, _)| k == "PATH")
            .map(|(_, v)| v.clone());
        let path = resolve_program(&opts.program, search_path.as_deref())?;

        let cstring = |bytes: &[u8]| {
            CString::new(bytes).map_err(|_| format!("{:?} contains a NUL byte", String::from_utf8_lossy(bytes)))
        };

        let mut argv = vec![cstring(opts.program.as_bytes())?];
        for arg in &opts.args {
            argv.push(cstring(arg.as_bytes())?);
        }

        let mut envp = Vec::with_capacity(vars.len());
        for (key, value) in &vars {
            let mut entry = key.as_bytes().to_vec();
            entry.push(b'=');
            entry.extend_from_slice(value.as_bytes());
            envp.push(cstring(&entry)?);
        }

        let working_dir = match &opts.working_dir {
            Some(dir) => Some(cstring(dir.as_os_str().as_bytes())?),
            None => None,
        };

        Ok(Self {
            path: cstring(path.as_os_str().as_bytes())?,
            argv,
            envp,
            working_dir,
        })
    }
}

/// Locate `program` the way `execvp` would, so a missing shell is reported
/// as a spawn failure instead of a child that exits 127.
fn resolve_program(program: &str, search_path: Option<&OsStr>) -> std::result::Result<PathBuf, String> {
    if program.is_empty() {
        return Err("no program given".to_string());
    }
    if program.contains('/') {
        let path = PathBuf::from(program);
        return if is_executable(&path) {
            Ok(path)
        } else {
            Err(format!("{program}: not an executable file"))
        };
    }
    let search_path = search_path.unwrap_or_else(|| OsStr::new("/usr/bin:/bin"));
    env::split_paths(search_path)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
        .ok_or_else(|| format!("{program}: command not found in PATH"))
}

fn is_executable(path: &Path) -> bool {
    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

fn set_cloexec(fd: RawFd) -> nix::Result<()> {
    fcntl(fd, FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC)).map(drop)
}

/// Restore the signal state a freshly started shell expects. Rust ignores
/// SIGPIPE at startup and ignored dispositions survive `execve`.
fn reset_signal_dispositions() {
    // Safety: signal(2), sigemptyset(3) and sigprocmask(2) are async-signal-safe
    unsafe {
        for sig in [
            libc::SIGINT,
            libc::SIGQUIT,
            libc::SIGTSTP,
            libc::SIGTTIN,
            libc::SIGTTOU,
            libc::SIGCHLD,
            libc::SIGPIPE,
            libc::SIGHUP,
            libc::SIGTERM,
        ] {
            libc::signal(sig, libc::SIG_DFL);
        }
        let mut empty: libc::sigset_t = std::mem::zeroed();
        libc::sigemptyset(&mut empty);
        libc::sigprocmask(libc::SIG_SETMASK, &empty, std::ptr::null_mut());
    }
}

/// Runs in the forked child. Only returns if something failed before exec.
fn exec_child(plan: &ExecPlan, master: RawFd, slave: RawFd) -> Errno {
    if let Err(e) = unistd::setsid() {
        return e;
    }

    // Safety: TIOCSCTTY on the slave we hold; we are a new session leader
    if unsafe { libc::ioctl(slave, libc::TIOCSCTTY as _, 0) } < 0 {
        return Errno::last();
    }

    for target in [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO] {
        if let Err(e) = unistd::dup2(slave, target) {
            return e;
        }
    }
    // Safety: both fds belong to this process and are not used again
    unsafe {
        if slave > libc::STDERR_FILENO {
            libc::close(slave);
        }
        libc::close(master);
    }

    if let Some(dir) = &plan.working_dir {
        if let Err(e) = unistd::chdir(dir.as_c_str()) {
            return e;
        }
    }

    reset_signal_dispositions();

    match unistd::execve(&plan.path, &plan.argv, &plan.envp) {
        Err(e) => e,
        Ok(never) => match never {},
    }
}

/// Map `'c'` to `^C` (0x03), `'z'` to `^Z` (0x1A) and so on.
pub fn control_byte(key: char) -> Option<u8> {
    let upper = key.to_ascii_uppercase();
    match upper {
        '@'..='_' => Some(upper as u8 & 0x1F),
        '?' => Some(0x7F),
        _ => None,
    }
}

/// A shell running in a pseudo-terminal.
pub struct PtySession {
    program: String,
    /// `None` once the session has been terminated and the device closed.
    master: Option<OwnedFd>,
    pid: Pid,
    pgid: Pid,
    buffer: OutputBuffer,
    filter: Option<EscapeFilter>,
    eof: bool,
    exit: Option<ExitStatus>,
    line_terminator: String,
    kill_grace: Duration,
}

impl PtySession {
    /// Allocate a pty and start `opts.program` on it.
    pub fn spawn(opts: &SpawnOptions) -> Result<Self> {
        let spawn_error = |reason: String| HarnessError::Spawn {
            program: opts.program.clone(),
            reason,
        };

        let plan = ExecPlan::build(opts).map_err(spawn_error)?;

        let winsize = Winsize {
            ws_row: opts.rows,
            ws_col: opts.cols,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };
        let pty = openpty(Some(&winsize), None).map_err(|e| spawn_error(format!("openpty failed: {e}")))?;
        // Other sessions spawned from this process must not inherit our pty
        set_cloexec(pty.master.as_raw_fd()).map_err(|e| spawn_error(format!("fcntl: {e}")))?;
        set_cloexec(pty.slave.as_raw_fd()).map_err(|e| spawn_error(format!("fcntl: {e}")))?;

        // exec failures come back through this pipe; a successful exec closes it
        let (err_rx, err_tx) = unistd::pipe().map_err(|e| spawn_error(format!("pipe failed: {e}")))?;
        set_cloexec(err_rx.as_raw_fd()).map_err(|e| spawn_error(format!("fcntl: {e}")))?;
        set_cloexec(err_tx.as_raw_fd()).map_err(|e| spawn_error(format!("fcntl: {e}")))?;

        // Safety: the child only makes async-signal-safe calls before exec,
        // everything it needs was allocated above
        match unsafe { unistd::fork() } {
            Ok(ForkResult::Child) => {
                let errno = exec_child(&plan, pty.master.as_raw_fd(), pty.slave.as_raw_fd());
                let report = (errno as i32).to_ne_bytes();
                // Safety: plain write(2) and _exit(2), both async-signal-safe
                unsafe {
                    libc::write(err_tx.as_raw_fd(), report.as_ptr().cast(), report.len());
                    libc::_exit(127);
                }
            }
            Ok(ForkResult::Parent { child }) => {
                drop(pty.slave);
                drop(err_tx);

                let mut report = Vec::new();
                File::from(err_rx)
                    .read_to_end(&mut report)
                    .map_err(|e| spawn_error(format!("reading exec status: {e}")))?;
                if report.len() >= 4 {
                    let errno = Errno::from_raw(i32::from_ne_bytes([report[0], report[1], report[2], report[3]]));
                    let _ = waitpid(child, None);
                    return Err(spawn_error(format!("exec failed: {errno}")));
                }

                let flags = fcntl(pty.master.as_raw_fd(), FcntlArg::F_GETFL)
                    .map_err(|e| spawn_error(format!("fcntl F_GETFL: {e}")))?;
                let flags = OFlag::from_bits_truncate(flags);
                fcntl(pty.master.as_raw_fd(), FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))
                    .map_err(|e| spawn_error(format!("fcntl F_SETFL: {e}")))?;

                tracing::debug!(program = %opts.program, pid = child.as_raw(), "spawned shell in pty");

                Ok(Self {
                    program: opts.program.clone(),
                    master: Some(pty.master),
                    pid: child,
                    // setsid made the child its own group leader
                    pgid: child,
                    buffer: OutputBuffer::new(),
                    filter: opts.strip_escapes.then(EscapeFilter::new),
                    eof: false,
                    exit: None,
                    line_terminator: opts.line_terminator.clone(),
                    kill_grace: opts.kill_grace,
                })
            }
            Err(e) => Err(spawn_error(format!("fork failed: {e}"))),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Process group of the shell itself.
    pub fn pgid(&self) -> Pid {
        self.pgid
    }

    pub fn buffer(&self) -> &OutputBuffer {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut OutputBuffer {
        &mut self.buffer
    }

    /// True once the terminal reported that no process holds the slave open.
    pub fn at_eof(&self) -> bool {
        self.eof
    }

    /// The recorded exit status, if the shell has been reaped.
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit
    }

    fn master(&self) -> Result<&OwnedFd> {
        self.master
            .as_ref()
            .ok_or_else(|| HarnessError::Io("session has been terminated".to_string()))
    }

    /// The shell's controlling terminal, queried through the master side.
    pub fn terminal(&self) -> Result<ControllingTerminal<'_>> {
        Ok(ControllingTerminal::new(self.master()?.as_fd()))
    }

    /// The process group that currently owns the terminal.
    ///
    /// Falls back to the `tpgid` the OS reports for the shell when the
    /// master does not answer `tcgetpgrp` on this platform.
    pub fn foreground_group(&self) -> Result<Pid> {
        match self.terminal()?.foreground_group() {
            Ok(pgid) => Ok(pgid),
            Err(err) => inspect::snapshot(self.pid)?
                .and_then(|snap| snap.tpgid)
                .ok_or(err),
        }
    }

    /// Change the terminal size; the foreground group receives SIGWINCH.
    pub fn resize(&self, rows: u16, cols: u16) -> Result<()> {
        self.terminal()?.set_window_size(rows, cols)
    }

    /// Non-blocking drain of everything the shell has written so far.
    ///
    /// Returns the number of raw bytes read from the terminal.
    pub fn read_available(&mut self) -> Result<usize> {
        if self.eof {
            return Ok(0);
        }
        let master = self.master()?.as_raw_fd();
        let mut chunk = [0u8; 4096];
        let mut total = 0;
        loop {
            match unistd::read(master, &mut chunk) {
                Ok(0) => {
                    self.eof = true;
                    break;
                }
                Ok(n) => {
                    self.ingest(&chunk[..n]);
                    total += n;
                }
                Err(Errno::EAGAIN) => break,
                Err(Errno::EINTR) => continue,
                // EIO on the master means every slave fd has been closed
                Err(Errno::EIO) => {
                    self.eof = true;
                    break;
                }
                Err(e) => return Err(HarnessError::io("pty read", e)),
            }
        }
        if total > 0 {
            tracing::trace!(bytes = total, pid = self.pid.as_raw(), "drained pty output");
        }
        Ok(total)
    }

    fn ingest(&mut self, bytes: &[u8]) {
        match &mut self.filter {
            Some(filter) => {
                let mut plain = Vec::with_capacity(bytes.len());
                filter.filter(bytes, &mut plain);
                self.buffer.append(&plain);
            }
            None => self.buffer.append(bytes),
        }
    }

    /// Block until the terminal has output to read, or `timeout` passes.
    pub fn wait_readable(&self, timeout: Duration) -> Result<bool> {
        let master = self.master()?;
        let mut fds = [PollFd::new(master.as_fd(), PollFlags::POLLIN)];
        let millis = timeout.as_micros().div_ceil(1000).min(i32::MAX as u128) as u32;
        let timeout = PollTimeout::try_from(millis).unwrap_or(PollTimeout::MAX);

        match nix::poll::poll(&mut fds, timeout) {
            Ok(0) => Ok(false),
            Ok(_) => {
                let revents = fds[0].revents().unwrap_or(PollFlags::empty());
                Ok(revents.intersects(PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR))
            }
            Err(Errno::EINTR) => Ok(false),
            Err(e) => Err(HarnessError::io("poll", e)),
        }
    }

    /// Write all bytes to the terminal, retrying while its input queue is full.
    fn write_all(&self, data: &[u8]) -> Result<()> {
        let master = self.master()?;
        let mut written = 0;
        let mut retries = 0u32;
        while written < data.len() {
            match unistd::write(master, &data[written..]) {
                Ok(n) => {
                    written += n;
                    retries = 0;
                }
                Err(Errno::EAGAIN) => {
                    retries += 1;
                    if retries > 5000 {
                        return Err(HarnessError::Io(
                            "pty write: input queue full after 5s of retries".into(),
                        ));
                    }
                    thread::sleep(Duration::from_millis(1));
                }
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(HarnessError::io("pty write", e)),
            }
        }
        Ok(())
    }

    fn ensure_alive(&mut self) -> Result<()> {
        match self.try_wait()? {
            None => Ok(()),
            Some(status) => Err(HarnessError::Io(format!(
                "cannot write to {}: shell {status}",
                self.program
            ))),
        }
    }

    /// Type `text` followed by the line terminator.
    pub fn send_line(&mut self, text: &str) -> Result<()> {
        self.ensure_alive()?;
        let mut data = Vec::with_capacity(text.len() + self.line_terminator.len());
        data.extend_from_slice(text.as_bytes());
        data.extend_from_slice(self.line_terminator.as_bytes());
        self.write_all(&data)
    }

    /// Write raw bytes to the terminal input.
    pub fn send_raw(&mut self, data: &[u8]) -> Result<()> {
        self.ensure_alive()?;
        self.write_all(data)
    }

    /// Type a control key, e.g. `'z'` for `^Z`.
    ///
    /// The terminal's line discipline turns `^C`, `^Z` and `^\` into signals
    /// for whichever process group is in the foreground, exactly as when a
    /// user presses them.
    pub fn send_control(&mut self, key: char) -> Result<()> {
        let byte = control_byte(key)
            .ok_or_else(|| HarnessError::Io(format!("{key:?} has no control character")))?;
        tracing::debug!(key = %key, pid = self.pid.as_raw(), "sending control key");
        self.send_raw(&[byte])
    }

    /// Deliver `signal` to the shell's process group.
    pub fn signal(&self, signal: JobSignal) -> Result<()> {
        self.signal_group(self.pgid, signal)
    }

    /// Deliver `signal` to an arbitrary process group, typically a job's.
    pub fn signal_group(&self, pgid: Pid, signal: JobSignal) -> Result<()> {
        tracing::debug!(pgid = pgid.as_raw(), signal = signal.signal().as_str(), "signalling process group");
        killpg(pgid, signal.signal())
            .map_err(|e| HarnessError::io(&format!("kill -{} -{}", signal.signal().as_str(), pgid), e))
    }

    /// Reap the shell if it has exited, without blocking.
    pub fn try_wait(&mut self) -> Result<Option<ExitStatus>> {
        if let Some(status) = self.exit {
            return Ok(Some(status));
        }
        let status = match waitpid(self.pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::Exited(_, code)) => ExitStatus::Exited(code),
            Ok(WaitStatus::Signaled(_, sig, _)) => ExitStatus::Signaled(sig),
            Ok(_) | Err(Errno::EINTR) => return Ok(None),
            Err(e) => return Err(HarnessError::io("waitpid", e)),
        };
        tracing::debug!(pid = self.pid.as_raw(), %status, "shell exited");
        self.exit = Some(status);
        Ok(Some(status))
    }

    pub fn is_alive(&mut self) -> bool {
        matches!(self.try_wait(), Ok(None))
    }

    /// Wait up to `timeout` for the shell to exit, draining its output meanwhile.
    pub fn wait_exit(&mut self, timeout: Duration) -> Result<ExitStatus> {
        let start = Instant::now();
        loop {
            if let Some(status) = self.try_wait()? {
                return Ok(status);
            }
            if let Some(signal) = pending_signal() {
                return Err(HarnessError::Interrupted { signal });
            }
            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return Err(HarnessError::ExitTimeout { elapsed });
            }
            let slice = (timeout - elapsed).min(EXIT_POLL);
            if self.master.is_some() && !self.eof {
                // A child blocked on a full terminal would never exit
                self.wait_readable(slice)?;
                self.read_available()?;
            } else {
                thread::sleep(slice);
            }
        }
    }

    /// Process groups to tear down: the shell's own, every group in its
    /// session, and any descendant that moved to another session.
    ///
    /// A job whose shell already exited has been reparented, so parentage
    /// alone misses it.
    fn job_groups(&self) -> Vec<Pid> {
        let own_group = getpgrp();
        let mut groups = vec![self.pgid];
        let procs = match inspect::all_processes() {
            Ok(procs) => procs,
            Err(e) => {
                tracing::debug!(error = %e, "could not enumerate processes");
                return groups;
            }
        };

        let in_session = procs.iter().filter(|p| p.sid == self.pid).cloned().collect::<Vec<_>>();
        let descendants = inspect::collect_descendants(self.pid, procs);
        for process in in_session.into_iter().chain(descendants) {
            if process.pgid != own_group && !groups.contains(&process.pgid) {
                groups.push(process.pgid);
            }
        }
        groups
    }

    /// Kill the shell and every job it started, reap it and close the pty.
    ///
    /// Safe to call more than once; later calls do nothing.
    pub fn terminate(&mut self) {
        if self.master.is_none() && self.exit.is_some() {
            return;
        }

        let groups = self.job_groups();

        if matches!(self.try_wait(), Ok(None)) {
            for &group in &groups {
                let _ = killpg(group, Signal::SIGTERM);
                let _ = killpg(group, Signal::SIGCONT);
            }
            let deadline = Instant::now() + self.kill_grace;
            while Instant::now() < deadline && matches!(self.try_wait(), Ok(None)) {
                thread::sleep(Duration::from_millis(5));
            }
        }

        // Interactive shells ignore SIGTERM and jobs may outlive the shell
        for &group in &groups {
            let _ = killpg(group, Signal::SIGKILL);
        }

        let deadline = Instant::now() + REAP_TIMEOUT;
        while self.exit.is_none() && Instant::now() < deadline {
            match self.try_wait() {
                Ok(None) => thread::sleep(Duration::from_millis(5)),
                Ok(Some(_)) => break,
                Err(e) => {
                    tracing::warn!(error = %e, pid = self.pid.as_raw(), "could not reap shell");
                    break;
                }
            }
        }

        self.master = None;
        tracing::debug!(pid = self.pid.as_raw(), status = ?self.exit, "session terminated");
    }
}

impl Drop for PtySession {
    fn drop(&mut self) {
        self.terminate();
    }
}
