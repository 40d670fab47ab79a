//! Rolling update-interval statistics.
//!
//! Both directions of the streaming channel record the time between
//! consecutive updates in a fixed-capacity window; the mean of the window is
//! reported as the update period in milliseconds.

use cri_common::consts::FREQUENCY_WINDOW;
use std::time::Instant;

/// Fixed-capacity circular buffer with an arithmetic mean.
#[derive(Debug, Clone)]
pub struct RollingWindow<const N: usize = FREQUENCY_WINDOW> {
    samples: [f64; N],
    next: usize,
    len: usize,
}

impl<const N: usize> Default for RollingWindow<N> {
    fn default() -> Self {
        Self {
            samples: [0.0; N],
            next: 0,
            len: 0,
        }
    }
}

impl<const N: usize> RollingWindow<N> {
    /// Add a sample, evicting the oldest once the window is full.
    pub fn push(&mut self, sample: f64) {
        if N == 0 {
            return;
        }
        self.samples[self.next] = sample;
        self.next = (self.next + 1) % N;
        if self.len < N {
            self.len += 1;
        }
    }

    /// Mean of the retained samples, 0.0 when empty.
    pub fn mean(&self) -> f64 {
        if self.len == 0 {
            return 0.0;
        }
        self.samples[..self.len].iter().sum::<f64>() / self.len as f64
    }

    /// Number of retained samples.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True if no sample has been pushed since the last reset.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Drop all samples.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Interval meter: timestamps updates and feeds the gaps into a window.
#[derive(Debug, Clone)]
pub struct UpdateMeter {
    window: RollingWindow,
    last: Instant,
}

impl Default for UpdateMeter {
    fn default() -> Self {
        Self::new(Instant::now())
    }
}

impl UpdateMeter {
    /// Create a meter whose first interval is measured from `start`.
    pub fn new(start: Instant) -> Self {
        Self {
            window: RollingWindow::default(),
            last: start,
        }
    }

    /// Record an update at `now`, returning the elapsed milliseconds since the
    /// previous one.
    pub fn record(&mut self, now: Instant) -> f64 {
        let elapsed_ms = now.saturating_duration_since(self.last).as_secs_f64() * 1000.0;
        self.window.push(elapsed_ms);
        self.last = now;
        elapsed_ms
    }

    /// Restart the meter at `start` and drop the recorded history.
    pub fn restart(&mut self, start: Instant) {
        self.window.reset();
        self.last = start;
    }

    /// Mean update period in milliseconds.
    pub fn mean_period_ms(&self) -> f64 {
        self.window.mean()
    }
}
