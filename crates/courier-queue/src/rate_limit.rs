// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Rolling-window limit on job starts.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Allows at most `max` starts within any `window`.
///
/// Keeps the start times of the last `max` admitted jobs; a new start is
/// admitted once the oldest of them has left the window.
#[derive(Debug)]
pub struct StartRateLimiter {
    max: usize,
    window: Duration,
    starts: VecDeque<Instant>,
}

impl StartRateLimiter {
    pub fn new(max: u32, window: Duration) -> Self {
        let max = (max as usize).max(1);
        Self {
            max,
            window,
            starts: VecDeque::with_capacity(max),
        }
    }

    /// Records a start at `now` if allowed; otherwise returns how long to wait.
    pub fn try_acquire(&mut self, now: Instant) -> Result<(), Duration> {
        while let Some(&oldest) = self.starts.front() {
            if now.duration_since(oldest) >= self.window {
                self.starts.pop_front();
            } else {
                break;
            }
        }
        if self.starts.len() < self.max {
            self.starts.push_back(now);
            return Ok(());
        }
        let oldest = self.starts.front().copied().unwrap_or(now);
        Err(self.window.saturating_sub(now.duration_since(oldest)))
    }

    /// Gives back the most recent start when it was not used.
    pub fn refund(&mut self) {
        self.starts.pop_back();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_within_capacity() {
        let mut rl = StartRateLimiter::new(3, Duration::from_secs(1));
        let now = Instant::now();
        assert!(rl.try_acquire(now).is_ok());
        assert!(rl.try_acquire(now).is_ok());
        assert!(rl.try_acquire(now).is_ok());
    }

    #[test]
    fn rejects_over_capacity_with_wait_hint() {
        let mut rl = StartRateLimiter::new(2, Duration::from_millis(1000));
        let start = Instant::now();
        rl.try_acquire(start).unwrap();
        rl.try_acquire(start + Duration::from_millis(400)).unwrap();
        let wait = rl
            .try_acquire(start + Duration::from_millis(600))
            .unwrap_err();
        assert_eq!(wait, Duration::from_millis(400));
    }

    #[test]
    fn window_rolls_forward() {
        let mut rl = StartRateLimiter::new(1, Duration::from_millis(100));
        let start = Instant::now();
        rl.try_acquire(start).unwrap();
        assert!(rl.try_acquire(start + Duration::from_millis(99)).is_err());
        assert!(rl.try_acquire(start + Duration::from_millis(100)).is_ok());
    }

    #[test]
    fn refunded_start_frees_its_slot() {
        let mut rl = StartRateLimiter::new(1, Duration::from_secs(10));
        let now = Instant::now();
        rl.try_acquire(now).unwrap();
        rl.refund();
        assert!(rl.try_acquire(now).is_ok());
        rl.refund();
        rl.refund();
        assert!(rl.try_acquire(now).is_ok());
    }
}
