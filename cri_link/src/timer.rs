//! Periodic background callbacks.
//!
//! Each timer owns one thread that invokes its callback every period until
//! stopped. Stopping drops the wake-up channel, so a sleeping timer returns
//! immediately instead of waiting out its period.

use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::debug;

/// Repeating timer backed by a dedicated thread.
pub struct PeriodicTimer {
    name: String,
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl PeriodicTimer {
    /// Start a timer that calls `tick` every `period`.
    ///
    /// The first call happens one period after start. Ticks are scheduled on
    /// fixed deadlines; a tick that overruns its period delays the next one
    /// without accumulating a backlog.
    ///
    /// # Errors
    /// Returns the OS error if the thread cannot be spawned.
    pub fn spawn<F>(name: &str, period: Duration, mut tick: F) -> std::io::Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let period = period.max(Duration::from_millis(1));
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let mut deadline = Instant::now() + period;
                loop {
                    let wait = deadline.saturating_duration_since(Instant::now());
                    match stop_rx.recv_timeout(wait) {
                        Err(RecvTimeoutError::Timeout) => {
                            tick();
                            deadline += period;
                            let now = Instant::now();
                            if deadline < now {
                                deadline = now + period;
                            }
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            })?;

        debug!("Timer '{}' started ({} ms)", name, period.as_millis());
        Ok(Self {
            name: name.to_string(),
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    /// Stop the timer and wait for an in-flight tick to finish.
    ///
    /// Safe to call repeatedly and from within the tick itself.
    pub fn stop(&mut self) {
        drop(self.stop_tx.take());
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
            debug!("Timer '{}' stopped", self.name);
        }
    }

    /// True until [`stop`](Self::stop) has been called.
    pub fn is_active(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for PeriodicTimer {
    fn drop(&mut self) {
        self.stop();
    }
}
