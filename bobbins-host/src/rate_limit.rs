//! Fixed-window message budget for sandboxed endpoints.

use std::time::Duration;
use tokio::time::Instant;

/// Counts events in fixed windows. Once `limit` is reached, further events
/// are refused until the window rolls over.
#[derive(Debug)]
pub struct RateWindow {
    limit: u32,
    window: Duration,
    window_start: Instant,
    count: u32,
}

impl RateWindow {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            window_start: Instant::now(),
            count: 0,
        }
    }

    /// Records one event. Returns `false` when the budget is exhausted.
    pub fn try_acquire(&mut self) -> bool {
        if self.window_start.elapsed() >= self.window {
            self.window_start = Instant::now();
            self.count = 0;
        }
        if self.count >= self.limit {
            return false;
        }
        self.count += 1;
        true
    }

    pub fn remaining(&self) -> u32 {
        self.limit.saturating_sub(self.count)
    }
}
