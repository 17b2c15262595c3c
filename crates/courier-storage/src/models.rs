// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Row types for the job store.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Lifecycle of a job row. "Delayed" is not stored: it is a waiting job
/// whose `run_at` lies in the future.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum JobStatus {
    Waiting,
    Active,
    Completed,
    Failed,
}

/// A job as stored.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRecord {
    pub id: i64,
    pub queue: String,
    pub payload: String,
    pub priority: i32,
    pub status: JobStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub backoff_ms: u64,
    /// Unix epoch milliseconds.
    pub run_at: i64,
    pub last_error: Option<String>,
    pub result: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Parameters of a job to insert.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub queue: String,
    pub payload: String,
    pub priority: i32,
    pub run_at: i64,
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

/// What a recorded failure did to the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// Back in `waiting`, runnable again after `delay`.
    Retrying { attempts: u32, delay: Duration },
    /// Moved to the failed set.
    Failed { attempts: u32 },
}

/// Per-status counts of one queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    /// Ready to run now.
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    /// Waiting with a future `run_at`.
    pub delayed: u64,
}
