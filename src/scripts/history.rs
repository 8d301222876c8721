use anyhow::{Context, Result};

use super::{exit_shell, output_line};
use crate::runner::TestRun;

const COMMANDS: &[(&str, &str)] = &[
    ("echo never", "never"),
    ("echo going", "going"),
    ("echo to give | rev", "evig ot"),
    ("echo you", "you"),
    ("echo up", "up"),
];

/// Run `line` and check it prints `output` on a line of its own.
fn run_command(run: &mut TestRun, line: &str, output: &str, what: &str) -> Result<()> {
    run.sendline(line)?;
    run.expect(&output_line(output))
        .with_context(|| format!("could not execute command '{what}'"))?;
    run.expect_prompt()?;
    Ok(())
}

pub fn run(run: &mut TestRun) -> Result<()> {
    for (line, output) in COMMANDS {
        run_command(run, line, output, line)?;
    }

    // the listing includes the history command itself
    run.sendline("history")?;
    let listed = COMMANDS.iter().map(|(line, _)| *line).chain(["history"]);
    for (number, line) in (1..).zip(listed) {
        run.expect(&format!(r"\n\r*\s*{number}\s+{}\r\n", regex::escape(line)))
            .with_context(|| format!("history entry {number} should be '{line}'"))?;
    }
    run.expect_prompt()?;

    run_command(run, "!-2", "up", "echo up")
        .context("!-2 did not rerun the command two back")?;
    run_command(run, "!!", "up", "echo up")
        .context("!! did not rerun the previous command")?;
    // `!echo` recalls `echo up` and the rest of the line is appended to it
    run_command(run, "!echo you", "up you", "echo up you")
        .context("!prefix did not rerun the most recent match")?;
    run_command(run, "!3", "evig ot", "echo to give | rev")
        .context("!3 did not rerun the third command")?;

    exit_shell(run)?;
    run.test_success();
    Ok(())
}
