// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Exponential backoff shared by job retries and reconnect scheduling.

use std::time::Duration;

/// Delay before the next try after `attempt` failures: `base × 2^(attempt-1)`.
///
/// Attempt 0 is treated as 1. The result saturates and is clamped to `cap`
/// when one is given.
pub fn exponential_delay(base: Duration, attempt: u32, cap: Option<Duration>) -> Duration {
    let exponent = attempt.max(1) - 1;
    let factor = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
    let delay = base.saturating_mul(factor);
    match cap {
        Some(cap) => delay.min(cap),
        None => delay,
    }
}
