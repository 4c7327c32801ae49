//! Flow-rate governor.
//!
//! Counts writes inside a window that starts with the first write after a
//! rollover. Reaching the threshold trips the overflow flag, which then stays
//! set for the lifetime of the governor: rollover resets the counter only.
//! Whether the one-way trip is intended or an oversight of the design this
//! models is an open question; it is kept as-is and pinned by tests.
//!
//! The governor is plain state. Arming the window timer is reported back to
//! the caller through [`WriteVerdict`] so the timer can be driven under the
//! same lock that guards this struct.

use std::time::Duration;

/// What a single write did to the governor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteVerdict {
    /// The window timer must be armed for this duration.
    pub arm_window: Option<Duration>,
    /// This write tripped the overflow flag.
    pub tripped: bool,
}

#[derive(Debug)]
pub struct FlowGovernor {
    window: Option<Duration>,
    threshold: usize,
    count: usize,
    overflowed: bool,
}

impl FlowGovernor {
    /// `window == None` disables governing and starts permanently overflowed.
    pub fn new(window: Option<Duration>, threshold: usize) -> Self {
        Self { window, threshold, count: 0, overflowed: window.is_none() }
    }

    pub fn on_write(&mut self) -> WriteVerdict {
        let Some(window) = self.window else {
            return WriteVerdict { arm_window: None, tripped: false };
        };

        self.count = self.count.saturating_add(1);
        let mut tripped = false;
        if self.count >= self.threshold && !self.overflowed {
            self.overflowed = true;
            tripped = true;
        }
        let arm_window = (self.count == 1).then_some(window);
        WriteVerdict { arm_window, tripped }
    }

    /// Window rollover. Resets the counter; overflow is left untouched.
    pub fn on_window_expire(&mut self) {
        self.count = 0;
    }

    pub fn is_overflowed(&self) -> bool {
        self.overflowed
    }

    pub fn is_enabled(&self) -> bool {
        self.window.is_some()
    }

    /// Writes counted in the current window.
    pub fn window_count(&self) -> usize {
        self.count
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn window(&self) -> Option<Duration> {
        self.window
    }
}
