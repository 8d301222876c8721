use shprobe::config::HarnessConfig;
use shprobe::inspect::{self, RunState};
use shprobe::runner::{run_script, TestRun};
use shprobe::scripts;
use shprobe::signal::JobSignal;
use std::cell::Cell;
use std::fs;
use std::path::Path;
use std::time::Duration;

fn interactive_sh() -> HarnessConfig {
    let mut config = HarnessConfig::for_shell("/bin/sh", &["-i".to_string()]);
    config.prompt = "test> ".to_string();
    config.set_env("PS1", "test> ");
    config.set_env("ENV", "");
    config.timeout = Duration::from_secs(5);
    config.kill_grace = Duration::from_millis(100);
    config
}

#[test]
fn test_passing_script() {
    let shell = Cell::new(None);
    let outcome = run_script("arith", &interactive_sh(), |run| {
        shell.set(Some(run.shell_pid()));
        run.sendline("echo $((6*7))")?;
        run.expect_exact("42\r\n")?;
        run.expect_prompt()?;
        run.sendline("exit")?;
        run.wait_exit(Duration::from_secs(5))?;
        run.test_success();
        Ok(())
    });

    assert!(outcome.passed, "{:?}", outcome.failure);
    assert_eq!(outcome.exit_code, 0);
    let pid = shell.get().unwrap();
    assert_eq!(inspect::run_state(pid).unwrap(), RunState::Gone);
}

#[test]
fn test_missing_success_declaration_fails() {
    let outcome = run_script("forgetful", &interactive_sh(), |run| {
        run.sendline("true")?;
        run.expect_prompt()?;
        Ok(())
    });

    assert!(!outcome.passed);
    assert_eq!(outcome.exit_code, 1);
    assert_eq!(outcome.failure.unwrap().error_code, "SCRIPT_INCOMPLETE");
}

#[test]
fn test_match_timeout_reports_expected_and_observed() {
    let mut config = interactive_sh();
    config.timeout = Duration::from_millis(300);
    let shell = Cell::new(None);

    let outcome = run_script("mismatch", &config, |run| {
        shell.set(Some(run.shell_pid()));
        run.sendline("echo $((1+1))")?;
        run.expect_exact("3\r\n")?;
        run.test_success();
        Ok(())
    });

    let failure = outcome.failure.unwrap();
    assert_eq!(failure.error_code, "MATCH_TIMEOUT");
    assert_eq!(failure.expected.as_deref(), Some("literal \"3\\r\\n\""));
    assert!(failure.observed.unwrap().contains("2\r\n"));
    assert_eq!(inspect::run_state(shell.get().unwrap()).unwrap(), RunState::Gone);
}

#[test]
fn test_panicking_script_still_cleans_up() {
    let shell = Cell::new(None);
    let outcome = run_script("panicky", &interactive_sh(), |run| {
        shell.set(Some(run.shell_pid()));
        panic!("assertion in script");
    });

    let failure = outcome.failure.unwrap();
    assert_eq!(failure.error_code, "SCRIPT_PANICKED");
    assert!(failure.message.contains("assertion in script"));
    assert_eq!(inspect::run_state(shell.get().unwrap()).unwrap(), RunState::Gone);
}

#[test]
fn test_shell_exit_during_expect() {
    let outcome = run_script("early-exit", &interactive_sh(), |run| {
        run.sendline("exit 4")?;
        run.expect_exact("never printed")?;
        run.test_success();
        Ok(())
    });

    let failure = outcome.failure.unwrap();
    assert_eq!(failure.error_code, "UNEXPECTED_EXIT");
    assert!(failure.message.contains("exited with status 4"));
}

#[test]
fn test_wrong_prompt_fails_setup() {
    let mut config = interactive_sh();
    config.prompt = "cush> ".to_string();
    config.startup_timeout = Duration::from_millis(300);

    let err = TestRun::setup("prompt", &config).err().unwrap();
    assert_eq!(err.error_code(), "MATCH_TIMEOUT");
    assert!(err.observed().unwrap().contains("test> "));
}

#[test]
fn test_signal_keys() {
    let outcome = run_script("keys", &interactive_sh(), |run| {
        run.sendline("cat")?;
        run.send_signal_key(JobSignal::Quit)?;
        run.expect_prompt()?;

        let err = run.send_signal_key(JobSignal::Stop).unwrap_err();
        assert_eq!(err.error_code(), "IO_ERROR");
        assert!(err.to_string().contains("SIGSTOP"));

        run.sendline("exit")?;
        run.wait_exit(Duration::from_secs(5))?;
        run.test_success();
        Ok(())
    });
    assert!(outcome.passed, "{:?}", outcome.failure);
}

fn bash() -> Option<&'static str> {
    ["/bin/bash", "/usr/bin/bash"]
        .into_iter()
        .find(|p| Path::new(p).exists())
}

/// bash with no rc files, a fixed prompt and a scratch HOME.
fn bash_config(home: &Path, workdir: &Path) -> Option<HarnessConfig> {
    let program = bash()?;
    let args = ["--norc".to_string(), "--noprofile".to_string(), "-i".to_string()];
    let mut config = HarnessConfig::for_shell(program, &args);
    config.prompt = "test> ".to_string();
    config.set_env("PS1", "test> ");
    config.set_env("TERM", "dumb");
    config.set_env("HOME", &home.display().to_string());
    config.set_env("HISTFILE", &home.join(".history").display().to_string());
    config.working_dir = Some(workdir.to_path_buf());
    config.kill_grace = Duration::from_millis(100);
    Some(config)
}

#[test]
fn test_bundled_scripts_against_bash() {
    let home = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let home_path = fs::canonicalize(home.path()).unwrap();
    let work_path = fs::canonicalize(work.path()).unwrap();

    let Some(config) = bash_config(&home_path, &work_path) else {
        eprintln!("bash not installed, skipping");
        return;
    };

    for script in scripts::SCRIPTS {
        let outcome = run_script(script.name, &config, script.run);
        assert!(outcome.passed, "{} failed: {:?}", script.name, outcome.failure);
    }
}
