use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use super::{exit_shell, output_line};
use crate::runner::TestRun;

/// `pwd` in most shells prints the physical path.
fn physical(path: &Path) -> String {
    fs::canonicalize(path)
        .unwrap_or_else(|_| path.to_path_buf())
        .display()
        .to_string()
}

pub fn run(run: &mut TestRun) -> Result<()> {
    let dir_name = format!("shprobe-cd-{}", std::process::id());
    let start = physical(run.working_dir());
    let inside = format!("{start}/{dir_name}");

    // make a directory and cd into it
    run.sendline(&format!("mkdir {dir_name}"))?;
    run.expect_prompt()?;
    run.sendline(&format!("cd {dir_name}"))?;
    run.expect_prompt()?;
    run.sendline("pwd")?;
    run.expect(&output_line(&inside))
        .with_context(|| format!("expected {inside}"))?;
    run.expect_prompt()?;

    // move out of it
    run.sendline("cd ../")?;
    run.expect_prompt()?;
    run.sendline("pwd")?;
    run.expect(&output_line(&start))
        .with_context(|| format!("expected {start}"))?;
    run.expect_prompt()?;

    run.sendline(&format!("rmdir {dir_name}"))?;
    run.expect_prompt()?;

    // the directory is gone now
    run.sendline(&format!("cd {dir_name}"))?;
    run.expect_exact("No such file or directory")
        .context("cd into a missing directory did not fail")?;
    run.expect_prompt()?;

    // no argument goes home
    let home = run
        .home_dir()
        .map(physical)
        .context("HOME is not set")?;
    run.sendline("cd")?;
    run.expect_prompt()?;
    run.sendline("pwd")?;
    run.expect(&output_line(&home))
        .context("cd does not go to home directory")?;
    run.expect_prompt()?;

    exit_shell(run)?;
    run.test_success();
    Ok(())
}
