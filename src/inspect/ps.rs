use std::process::Command;

use nix::unistd::Pid;

use super::{inspect_error, parse_ps_line, ProcessSnapshot};
use crate::error::Result;

const FORMAT: &str = "pid=,ppid=,pgid=,sess=,tpgid=,stat=,comm=";

fn run_ps(args: &[&str]) -> Result<String> {
    let output = Command::new("ps")
        .args(args)
        .output()
        .map_err(|e| inspect_error("ps", e))?;
    // ps exits 1 when -p names no live process
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

pub fn snapshot(pid: Pid) -> Result<Option<ProcessSnapshot>> {
    let pid = pid.to_string();
    let stdout = run_ps(&["-o", FORMAT, "-p", &pid])?;
    Ok(stdout.lines().find_map(parse_ps_line))
}

pub fn all_processes() -> Result<Vec<ProcessSnapshot>> {
    let stdout = run_ps(&["-A", "-o", FORMAT])?;
    Ok(stdout.lines().filter_map(parse_ps_line).collect())
}
