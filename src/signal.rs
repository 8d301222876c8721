use anyhow::{anyhow, Result};
use nix::sys::signal::Signal;
use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Mutex;
use std::thread;

/// Global flag indicating the harness itself was signalled
static SIGNAL_RECEIVED: AtomicBool = AtomicBool::new(false);

/// The signal that was received (0 if none)
static SIGNAL_NUMBER: AtomicI32 = AtomicI32::new(0);

/// Set once the listener thread is running
static INSTALLED: Mutex<bool> = Mutex::new(false);

/// Listens for SIGINT, SIGTERM and SIGHUP sent to the harness process.
///
/// The harness never dies from these directly: the listener records the
/// signal, every blocking wait notices it and fails with `Interrupted`, and
/// the runner cleans up the shell before exiting.
#[derive(Clone, Copy, Default)]
pub struct SignalHandler;

impl SignalHandler {
    pub fn new() -> Self {
        Self
    }

    /// Start the listener thread. Calling this more than once is harmless.
    pub fn setup(&self) -> Result<()> {
        let mut installed = INSTALLED.lock().map_err(|_| anyhow!("signal listener lock poisoned"))?;
        if *installed {
            return Ok(());
        }
        let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])?;

        thread::spawn(move || {
            for sig in signals.forever() {
                tracing::warn!(signal = sig, "harness received signal");
                SIGNAL_NUMBER.store(sig, Ordering::SeqCst);
                SIGNAL_RECEIVED.store(true, Ordering::SeqCst);
            }
        });
        *installed = true;

        Ok(())
    }

    /// Forget a harness signal once it has been reported, so the next
    /// script in a long-lived process is not failed by it.
    pub fn reset(&self) {
        SIGNAL_RECEIVED.store(false, Ordering::SeqCst);
        SIGNAL_NUMBER.store(0, Ordering::SeqCst);
    }
}

/// The pending harness signal, if any. Checked by every blocking wait.
///
/// Stays set until [`SignalHandler::reset`]; `run_script` resets it after
/// turning it into an `Interrupted` outcome.
pub fn pending_signal() -> Option<i32> {
    if SIGNAL_RECEIVED.load(Ordering::SeqCst) {
        Some(SIGNAL_NUMBER.load(Ordering::SeqCst))
    } else {
        None
    }
}

/// Signals a test script can deliver to the shell or to one of its jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobSignal {
    /// SIGINT, what `^C` generates
    Interrupt,
    /// SIGQUIT, what `^\` generates
    Quit,
    /// SIGTSTP, what `^Z` generates
    Suspend,
    /// SIGSTOP, cannot be caught or ignored
    Stop,
    /// SIGCONT
    Continue,
    /// SIGHUP
    Hangup,
    /// SIGTERM
    Terminate,
    /// SIGKILL
    Kill,
}

impl JobSignal {
    pub fn signal(self) -> Signal {
        match self {
            JobSignal::Interrupt => Signal::SIGINT,
            JobSignal::Quit => Signal::SIGQUIT,
            JobSignal::Suspend => Signal::SIGTSTP,
            JobSignal::Stop => Signal::SIGSTOP,
            JobSignal::Continue => Signal::SIGCONT,
            JobSignal::Hangup => Signal::SIGHUP,
            JobSignal::Terminate => Signal::SIGTERM,
            JobSignal::Kill => Signal::SIGKILL,
        }
    }

    /// The keystroke that makes the terminal raise this signal, if any.
    pub fn control_key(self) -> Option<char> {
        match self {
            JobSignal::Interrupt => Some('c'),
            JobSignal::Quit => Some('\\'),
            JobSignal::Suspend => Some('z'),
            _ => None,
        }
    }
}
