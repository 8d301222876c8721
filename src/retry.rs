//! Bounded polling for process states that change asynchronously.
//!
//! After `^Z` the kernel stops the job, then the shell notices and reclaims
//! the terminal. None of that is synchronous with the keystroke, so every
//! state assertion polls until the state appears or a deadline passes.

use std::thread;
use std::time::{Duration, Instant};

use crate::error::{HarnessError, Result};
use crate::signal::pending_signal;

/// One observation made by a [`Settle`] probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe<T> {
    /// The expected state was observed.
    Ready(T),
    /// Not there yet; carries a description of what was seen instead.
    Pending(String),
}

/// Poll with exponential backoff until a probe succeeds or time runs out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settle {
    pub max_wait: Duration,
    pub initial_interval: Duration,
    pub max_interval: Duration,
}

impl Default for Settle {
    fn default() -> Self {
        Self {
            max_wait: Duration::from_secs(2),
            initial_interval: Duration::from_millis(5),
            max_interval: Duration::from_millis(100),
        }
    }
}

impl Settle {
    pub fn new(max_wait: Duration) -> Self {
        Self {
            max_wait,
            ..Self::default()
        }
    }

    /// Run `probe` until it reports [`Probe::Ready`].
    ///
    /// The probe always runs at least once and once more at the deadline.
    /// On timeout the error carries `expected` and the last pending
    /// observation. Errors from the probe abort the wait immediately.
    pub fn until<T, F>(&self, expected: &str, mut probe: F) -> Result<T>
    where
        F: FnMut() -> Result<Probe<T>>,
    {
        let start = Instant::now();
        let mut interval = self.initial_interval;
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let observed = match probe()? {
                Probe::Ready(value) => {
                    tracing::debug!(expected, attempts, elapsed = ?start.elapsed(), "state settled");
                    return Ok(value);
                }
                Probe::Pending(observed) => observed,
            };

            let elapsed = start.elapsed();
            if elapsed >= self.max_wait {
                return Err(HarnessError::ProcessStateTimeout {
                    expected: expected.to_string(),
                    observed,
                    elapsed,
                });
            }
            if let Some(signal) = pending_signal() {
                return Err(HarnessError::Interrupted { signal });
            }

            thread::sleep(interval.min(self.max_wait - elapsed));
            interval = (interval * 2).min(self.max_interval);
        }
    }
}
