pub mod cycle;
pub mod notifier;

use anyhow::{Result, anyhow};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub use cycle::{CycleReport, CycleSettings, MessageReport, run_cycle};
pub use notifier::{LogReporter, Notifier, Reporter, Reporters};

pub const STARTUP_DELAY: Duration = Duration::from_secs(2);

enum PollState {
    Idle,
    Running {
        stop: Sender<()>,
        handle: JoinHandle<()>,
    },
}

/// Runs at most one background poll worker. Start while running and stop while
/// idle are no-ops. Stopping takes effect between cycles, never inside one.
pub struct Poller {
    state: Mutex<PollState>,
    startup_delay: Duration,
}

impl Default for Poller {
    fn default() -> Self {
        Self::new()
    }
}

impl Poller {
    pub fn new() -> Self {
        Self::with_startup_delay(STARTUP_DELAY)
    }

    pub fn with_startup_delay(startup_delay: Duration) -> Self {
        Self {
            state: Mutex::new(PollState::Idle),
            startup_delay,
        }
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, PollState>> {
        self.state
            .lock()
            .map_err(|e| anyhow!("poller lock poisoned: {e}"))
    }

    /// Spawn the worker running `cycle` every `interval`. Returns false if one is already running.
    pub fn start<F>(&self, interval: Duration, cycle: F) -> Result<bool>
    where
        F: FnMut() + Send + 'static,
    {
        let mut state = self.lock_state()?;
        if matches!(*state, PollState::Running { .. }) {
            return Ok(false);
        }

        let (stop, stop_rx) = mpsc::channel();
        let delay = self.startup_delay;
        let handle = thread::Builder::new()
            .name("imap-poll".to_string())
            .spawn(move || poll_loop(stop_rx, delay, interval, cycle))?;

        *state = PollState::Running { stop, handle };
        Ok(true)
    }

    /// Signal the worker to stop. Returns its handle so the caller can wait for an
    /// in-flight cycle, or `None` if nothing was running.
    pub fn stop(&self) -> Result<Option<JoinHandle<()>>> {
        let mut state = self.lock_state()?;
        match std::mem::replace(&mut *state, PollState::Idle) {
            PollState::Idle => Ok(None),
            PollState::Running { stop, handle } => {
                // the worker may already be gone; nothing to signal then
                let _ = stop.send(());
                Ok(Some(handle))
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock_state()
            .map(|s| matches!(*s, PollState::Running { .. }))
            .unwrap_or(false)
    }
}

fn poll_loop<F: FnMut()>(stop: Receiver<()>, delay: Duration, interval: Duration, mut cycle: F) {
    if stop_requested(&stop, delay) {
        return;
    }
    loop {
        let started = Instant::now();
        cycle();
        if stop_requested(&stop, interval.saturating_sub(started.elapsed())) {
            return;
        }
    }
}

/// Wait up to `wait`; true if a stop arrived or the poller was dropped.
fn stop_requested(stop: &Receiver<()>, wait: Duration) -> bool {
    !matches!(stop.recv_timeout(wait), Err(RecvTimeoutError::Timeout))
}
