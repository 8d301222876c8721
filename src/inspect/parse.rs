use nix::unistd::Pid;

use super::{ProcessSnapshot, RunState};

fn pid_field(field: &str) -> Option<Pid> {
    field.parse::<i32>().ok().map(Pid::from_raw)
}

/// A tpgid of -1 (or 0 from some `ps` builds) means no controlling terminal.
fn tpgid_field(field: &str) -> Option<Option<Pid>> {
    let raw = field.parse::<i32>().ok()?;
    Some((raw > 0).then(|| Pid::from_raw(raw)))
}

/// Parse the contents of `/proc/<pid>/stat`.
///
/// The command name sits in parentheses and may itself contain spaces or
/// parentheses, so the fixed fields are read after the last `)`.
pub fn parse_stat(content: &str) -> Option<ProcessSnapshot> {
    let open = content.find('(')?;
    let close = content.rfind(')')?;
    if close < open {
        return None;
    }
    let pid = pid_field(content[..open].trim())?;
    let command = content[open + 1..close].to_string();

    let mut fields = content[close + 1..].split_whitespace();
    let state = RunState::from_code(fields.next()?.chars().next()?);
    let ppid = pid_field(fields.next()?)?;
    let pgid = pid_field(fields.next()?)?;
    let sid = pid_field(fields.next()?)?;
    let _tty_nr = fields.next()?;
    let tpgid = tpgid_field(fields.next()?)?;

    Some(ProcessSnapshot {
        pid,
        ppid,
        pgid,
        sid,
        tpgid,
        state,
        command,
    })
}

fn next_field<'a>(rest: &mut &'a str) -> Option<&'a str> {
    let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
    let (field, tail) = rest.split_at(end);
    *rest = tail.trim_start();
    (!field.is_empty()).then_some(field)
}

/// Parse one line of `ps -o pid=,ppid=,pgid=,sess=,tpgid=,stat=,comm=`.
///
/// Everything after the state column is the command, spaces included.
pub fn parse_ps_line(line: &str) -> Option<ProcessSnapshot> {
    let mut rest = line.trim_start();

    let pid = pid_field(next_field(&mut rest)?)?;
    let ppid = pid_field(next_field(&mut rest)?)?;
    let pgid = pid_field(next_field(&mut rest)?)?;
    // Some platforms print a session pointer rather than an id
    let sid = pid_field(next_field(&mut rest)?).unwrap_or(Pid::from_raw(0));
    let tpgid = tpgid_field(next_field(&mut rest)?)?;
    let state = RunState::from_code(next_field(&mut rest)?.chars().next()?);
    let command = rest.trim_end().to_string();

    Some(ProcessSnapshot {
        pid,
        ppid,
        pgid,
        sid,
        tpgid,
        state,
        command,
    })
}
