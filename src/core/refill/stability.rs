//! Weight stability filter
//! A reading is trusted once it has held unchanged, above a threshold, for a
//! fixed window. Any change restarts the window.

use std::time::Duration;

use tokio::time::Instant;

/// The weight being watched and when it was first seen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StabilityWindow {
    pub weight: u32,
    pub since: Instant,
}

#[derive(Debug, Clone)]
pub struct StabilityFilter {
    window_len: Duration,
    /// Readings at or below this never arm the window
    threshold: u32,
    window: Option<StabilityWindow>,
    stable: bool,
}

impl StabilityFilter {
    pub fn new(window_len: Duration, threshold: u32) -> Self {
        Self {
            window_len,
            threshold,
            window: None,
            stable: false,
        }
    }

    pub fn window(&self) -> Option<StabilityWindow> {
        self.window
    }

    /// Feeds a reading. Returns true if this took away a stable reading.
    pub fn observe(&mut self, weight: u32, now: Instant) -> bool {
        let was_stable = self.stable;
        if weight <= self.threshold {
            self.window = None;
            self.stable = false;
            return was_stable;
        }
        if self.window.is_some_and(|w| w.weight == weight) {
            return false;
        }
        self.window = Some(StabilityWindow { weight, since: now });
        self.stable = false;
        was_stable
    }

    /// When the current window elapses, if one is running.
    pub fn deadline(&self) -> Option<Instant> {
        if self.stable {
            return None;
        }
        self.window.map(|w| w.since + self.window_len)
    }

    /// Returns true exactly once per window, when it elapses.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.deadline() {
            Some(deadline) if now >= deadline => {
                self.stable = true;
                true
            }
            _ => false,
        }
    }

    pub fn is_stable(&self) -> bool {
        self.stable
    }

    /// The trusted reading, if there is one
    pub fn stable_weight(&self) -> Option<u32> {
        self.window.filter(|_| self.stable).map(|w| w.weight)
    }
}
