use nix::sys::signal::Signal;
use shprobe::error::HarnessError;
use shprobe::expect::{expect, Pattern};
use shprobe::inspect::{self, RunState};
use shprobe::pty::{ExitStatus, PtySession, SpawnOptions};
use shprobe::signal::JobSignal;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(5);

fn options(program: &str, args: &[&str]) -> SpawnOptions {
    let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
    SpawnOptions::new(program, &args)
}

fn spawn(program: &str, args: &[&str]) -> PtySession {
    PtySession::spawn(&options(program, args)).unwrap()
}

#[test]
fn test_spawn_and_read_output() {
    let mut session = spawn("echo", &["one", "two"]);
    let found = expect(&mut session, &Pattern::literal("one two\r\n"), TIMEOUT).unwrap();
    assert_eq!(found.text, "one two\r\n");

    let status = session.wait_exit(TIMEOUT).unwrap();
    assert_eq!(status, ExitStatus::Exited(0));
    assert!(!session.is_alive());
}

#[test]
fn test_session_is_its_own_group_leader() {
    let session = spawn("sleep", &["30"]);
    assert_eq!(session.pgid(), session.pid());

    let snap = inspect::snapshot(session.pid()).unwrap().unwrap();
    assert_eq!(snap.pgid, session.pid());
    assert_eq!(snap.sid, session.pid());
}

#[test]
fn test_child_owns_the_terminal() {
    let session = spawn("sleep", &["30"]);
    assert_eq!(session.foreground_group().unwrap(), session.pgid());
}

#[test]
fn test_missing_program_is_spawn_error() {
    let err = PtySession::spawn(&options("shprobe-no-such-shell", &[])).err().unwrap();
    assert_eq!(err.error_code(), "SPAWN_ERROR");
    assert!(err.to_string().contains("shprobe-no-such-shell"));
}

#[test]
fn test_send_line_round_trip() {
    let mut session = spawn("cat", &[]);
    session.send_line("hello").unwrap();

    // The terminal echoes the line, then cat prints it back
    let echo = expect(&mut session, &Pattern::literal("hello\r\n"), TIMEOUT).unwrap();
    let output = expect(&mut session, &Pattern::literal("hello\r\n"), TIMEOUT).unwrap();
    assert!(output.start >= echo.end);
    assert_eq!(session.buffer().consumed_offset(), output.end);
}

#[test]
fn test_send_after_exit_is_io_error() {
    let mut session = spawn("true", &[]);
    session.wait_exit(TIMEOUT).unwrap();

    match session.send_line("anyone there") {
        Err(HarnessError::Io(message)) => assert!(message.contains("exited with status 0")),
        other => panic!("expected Io error, got {other:?}"),
    }
}

#[test]
fn test_control_c_interrupts_foreground_program() {
    let mut session = spawn("cat", &[]);
    session.send_control('c').unwrap();
    let status = session.wait_exit(TIMEOUT).unwrap();
    assert_eq!(status, ExitStatus::Signaled(Signal::SIGINT));
    assert_eq!(status.code(), 130);
}

#[test]
fn test_control_d_ends_input() {
    let mut session = spawn("cat", &[]);
    session.send_control('d').unwrap();
    assert_eq!(session.wait_exit(TIMEOUT).unwrap(), ExitStatus::Exited(0));
}

#[test]
fn test_wait_exit_times_out() {
    let mut session = spawn("sleep", &["30"]);
    match session.wait_exit(Duration::from_millis(100)) {
        Err(HarnessError::ExitTimeout { elapsed }) => assert!(elapsed >= Duration::from_millis(100)),
        other => panic!("expected ExitTimeout, got {other:?}"),
    }
    assert!(session.is_alive());
}

#[test]
fn test_terminate_kills_and_reaps() {
    let mut session = spawn("sleep", &["30"]);
    let pid = session.pid();
    session.terminate();

    assert_eq!(inspect::run_state(pid).unwrap(), RunState::Gone);
    assert_eq!(session.exit_status(), Some(ExitStatus::Signaled(Signal::SIGTERM)));

    // Second call is a no-op and the device is closed
    session.terminate();
    assert!(session.terminal().is_err());
}

#[test]
fn test_terminate_escalates_past_ignored_sigterm() {
    let mut opts = options("sh", &["-c", "trap '' TERM; echo ready; sleep 30"]);
    opts.kill_grace = Duration::from_millis(100);
    let mut session = PtySession::spawn(&opts).unwrap();
    expect(&mut session, &Pattern::literal("ready"), TIMEOUT).unwrap();

    let pid = session.pid();
    session.terminate();
    assert_eq!(inspect::run_state(pid).unwrap(), RunState::Gone);
    assert_eq!(session.exit_status(), Some(ExitStatus::Signaled(Signal::SIGKILL)));
}

#[test]
fn test_drop_terminates() {
    let pid = {
        let session = spawn("sleep", &["30"]);
        session.pid()
    };
    assert_eq!(inspect::run_state(pid).unwrap(), RunState::Gone);
}

#[test]
fn test_stop_and_continue_round_trip() {
    let session = spawn("sleep", &["30"]);
    let settle = shprobe::retry::Settle::default();

    session.signal(JobSignal::Stop).unwrap();
    inspect::wait_for_run_state(session.pid(), RunState::Stopped, &settle).unwrap();

    session.signal(JobSignal::Continue).unwrap();
    inspect::wait_for_run_state(session.pid(), RunState::Running, &settle).unwrap();
    assert_eq!(session.foreground_group().unwrap(), session.pgid());
}

#[test]
fn test_window_size_reaches_child() {
    let mut opts = options("stty", &["size"]);
    opts.rows = 40;
    opts.cols = 120;
    let mut session = PtySession::spawn(&opts).unwrap();
    expect(&mut session, &Pattern::literal("40 120"), TIMEOUT).unwrap();
}

#[test]
fn test_resize() {
    let mut session = spawn("sh", &["-c", "read line; stty size"]);
    session.resize(33, 99).unwrap();
    assert_eq!(session.terminal().unwrap().window_size().unwrap(), (33, 99));
    session.send_line("go").unwrap();
    expect(&mut session, &Pattern::literal("33 99"), TIMEOUT).unwrap();
}

#[test]
fn test_environment_and_working_dir() {
    let dir = tempfile::tempdir().unwrap();
    let physical = std::fs::canonicalize(dir.path()).unwrap();

    let mut opts = options("sh", &["-c", "echo \"value=$SHPROBE_PTY_TEST\"; /bin/pwd -P"]);
    opts.env.push(("SHPROBE_PTY_TEST".into(), "forty two".into()));
    opts.working_dir = Some(dir.path().to_path_buf());
    let mut session = PtySession::spawn(&opts).unwrap();

    expect(&mut session, &Pattern::literal("value=forty two\r\n"), TIMEOUT).unwrap();
    let cwd = format!("{}\r\n", physical.display());
    expect(&mut session, &Pattern::literal(cwd), TIMEOUT).unwrap();
}

#[test]
fn test_escape_sequences_are_stripped() {
    let mut session = spawn("printf", &["\\033[1;31mred\\033[0m plain\\n"]);
    expect(&mut session, &Pattern::literal("red plain\r\n"), TIMEOUT).unwrap();
}

#[test]
fn test_escape_sequences_kept_when_disabled() {
    let mut opts = options("printf", &["\\033[1;31mred\\033[0m\\n"]);
    opts.strip_escapes = false;
    let mut session = PtySession::spawn(&opts).unwrap();
    expect(&mut session, &Pattern::literal("\x1b[1;31mred\x1b[0m\r\n"), TIMEOUT).unwrap();
}
