use anyhow::{Context, Result};

use super::exit_shell;
use crate::inspect::RunState;
use crate::runner::TestRun;

const JOB_COMMAND: &str = "sleep 30";

pub fn run(run: &mut TestRun) -> Result<()> {
    run.sendline(&format!("{JOB_COMMAND} &"))?;
    let job = run
        .expect_bg_status()
        .context("shell did not report the background job")?;
    run.expect_prompt()?;
    run.assert_run_state(job.pgid, RunState::Running)?;
    run.assert_background(job.pgid)
        .context("background job owns the terminal")?;

    run.sendline("jobs")?;
    run.expect_job_line(job.id, "Running", JOB_COMMAND)
        .context("jobs did not list the background job")?;
    run.expect_prompt()?;

    // fg hands over the terminal and the prompt stays away
    run.sendline(&format!("fg {}", job.id))?;
    run.assert_foreground(job.pgid)
        .context("fg did not give the terminal to the job")?;

    run.suspend()?;
    run.assert_run_state(job.pgid, RunState::Stopped)
        .context("^Z did not stop the job")?;
    run.expect_prompt()?;
    run.assert_shell_foreground()
        .context("shell did not take the terminal back after ^Z")?;

    run.sendline(&format!("bg {}", job.id))?;
    run.expect_prompt()?;
    run.assert_run_state(job.pgid, RunState::Running)
        .context("bg did not continue the job")?;
    run.assert_background(job.pgid)?;

    run.sendline(&format!("fg {}", job.id))?;
    run.assert_foreground(job.pgid)?;
    run.interrupt()?;
    run.assert_run_state(job.pgid, RunState::Gone)
        .context("^C did not end the job")?;
    run.expect_prompt()?;
    run.assert_shell_foreground()?;
    run.assert_child_count(0)
        .context("shell left children behind")?;

    exit_shell(run)?;
    run.test_success();
    Ok(())
}
