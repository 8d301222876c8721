use std::fs;
use std::io::ErrorKind;

use nix::unistd::Pid;

use super::{inspect_error, parse_stat, ProcessSnapshot};
use crate::error::Result;

pub fn snapshot(pid: Pid) -> Result<Option<ProcessSnapshot>> {
    let path = format!("/proc/{pid}/stat");
    match fs::read_to_string(&path) {
        Ok(content) => parse_stat(&content)
            .map(Some)
            .ok_or_else(|| inspect_error(&path, "unrecognised format")),
        // Raced with the process exiting
        Err(e) if e.kind() == ErrorKind::NotFound || e.raw_os_error() == Some(libc::ESRCH) => Ok(None),
        Err(e) => Err(inspect_error(&path, e)),
    }
}

pub fn all_processes() -> Result<Vec<ProcessSnapshot>> {
    let entries = fs::read_dir("/proc").map_err(|e| inspect_error("/proc", e))?;
    let mut procs = Vec::new();
    for entry in entries.flatten() {
        let Some(pid) = entry.file_name().to_str().and_then(|name| name.parse::<i32>().ok()) else {
            continue;
        };
        match snapshot(Pid::from_raw(pid)) {
            Ok(Some(snap)) => procs.push(snap),
            Ok(None) => {}
            Err(e) => tracing::trace!(pid, error = %e, "skipping unreadable process"),
        }
    }
    Ok(procs)
}
