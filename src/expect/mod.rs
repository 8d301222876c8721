//! Waiting for output from the shell.
//!
//! Every match consumes the buffer up to the end of the matched text, so a
//! later expectation can only match output that appeared after the previous
//! one. Alternatives passed to [`expect_any`] are tried in the order given;
//! the first one that matches anywhere in the unconsumed output wins, even if
//! a later alternative would have matched earlier in the text.

mod pattern;

pub use pattern::Pattern;

use std::time::{Duration, Instant};

use crate::error::{HarnessError, Result};
use crate::pty::{OutputBuffer, PtySession};
use crate::signal::pending_signal;

/// Longest single poll while waiting, so harness signals are noticed promptly.
const POLL_SLICE: Duration = Duration::from_millis(50);

/// A successful expectation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    /// Index of the alternative that matched.
    pub pattern_index: usize,
    /// Absolute offset of the match in the session's output.
    pub start: usize,
    /// Absolute offset just past the match; the buffer is consumed up to here.
    pub end: usize,
    pub text: String,
    /// Unconsumed output that preceded the match.
    pub before: String,
    /// Regex capture groups, starting at group 1.
    pub captures: Vec<Option<String>>,
}

impl Match {
    /// Capture group `group` (1-based, like the regex).
    pub fn capture(&self, group: usize) -> Option<&str> {
        group
            .checked_sub(1)
            .and_then(|i| self.captures.get(i))
            .and_then(|c| c.as_deref())
    }
}

/// Match `patterns` against the unconsumed output without waiting.
///
/// On success the buffer is consumed through the end of the match.
pub fn try_match(buffer: &mut OutputBuffer, patterns: &[Pattern]) -> Option<Match> {
    let offset = buffer.consumed_offset();
    let (pattern_index, found, before, text) = {
        let haystack = buffer.unconsumed();
        patterns.iter().enumerate().find_map(|(index, pattern)| {
            pattern.find(haystack).map(|found| {
                let before = String::from_utf8_lossy(&haystack[..found.start]).into_owned();
                let text = String::from_utf8_lossy(&haystack[found.start..found.end]).into_owned();
                (index, found, before, text)
            })
        })?
    };
    buffer.consume(found.end);

    Some(Match {
        pattern_index,
        start: offset + found.start,
        end: offset + found.end,
        text,
        before,
        captures: found.captures,
    })
}

fn describe_all(patterns: &[Pattern]) -> String {
    patterns
        .iter()
        .map(Pattern::describe)
        .collect::<Vec<_>>()
        .join(" or ")
}

/// Wait up to `timeout` for any of `patterns` to appear.
pub fn expect_any(session: &mut PtySession, patterns: &[Pattern], timeout: Duration) -> Result<Match> {
    let start = Instant::now();
    loop {
        session.read_available()?;

        if let Some(found) = try_match(session.buffer_mut(), patterns) {
            tracing::debug!(
                pattern = %patterns[found.pattern_index].describe(),
                start = found.start,
                end = found.end,
                "matched"
            );
            return Ok(found);
        }

        if let Some(signal) = pending_signal() {
            return Err(HarnessError::Interrupted { signal });
        }

        // A job holding the terminal open keeps EOF away after the shell dies
        if let Some(status) = session.try_wait()? {
            session.read_available()?;
            if let Some(found) = try_match(session.buffer_mut(), patterns) {
                return Ok(found);
            }
            return Err(HarnessError::UnexpectedExit {
                expected: describe_all(patterns),
                observed: session.buffer().unconsumed_text(),
                status,
            });
        }

        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return Err(HarnessError::MatchTimeout {
                expected: describe_all(patterns),
                observed: session.buffer().unconsumed_text(),
                elapsed,
            });
        }

        let slice = (timeout - elapsed).min(POLL_SLICE);
        if session.at_eof() {
            std::thread::sleep(slice);
        } else {
            session.wait_readable(slice)?;
        }
    }
}

/// Wait up to `timeout` for `pattern` to appear.
pub fn expect(session: &mut PtySession, pattern: &Pattern, timeout: Duration) -> Result<Match> {
    expect_any(session, std::slice::from_ref(pattern), timeout)
}
