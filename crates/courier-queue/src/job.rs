// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Job views handed to handlers and callers.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use courier_core::CourierError;
use courier_core::types::{Direction, QueueMessageData};
use courier_storage::JobStatus;
use courier_storage::queries::jobs;

use crate::MessageQueue;

/// A claimed job as seen by a handler.
#[derive(Debug, Clone)]
pub struct QueueJob {
    pub id: i64,
    pub direction: Direction,
    pub data: QueueMessageData,
    /// 1 for the first try.
    pub attempt: u32,
    pub max_attempts: u32,
}

/// Per-enqueue overrides.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnqueueOptions {
    /// Lower runs first. Falls back to the data's own priority.
    pub priority: Option<i32>,
    /// Hold the job back this long. Falls back to the data's own delay.
    pub delay: Option<Duration>,
}

/// Terminal result delivered to waiters.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum JobOutcome {
    Completed(serde_json::Value),
    Failed(String),
}

/// Counts for one direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub delayed: u64,
    pub paused: bool,
}

/// Reference to an enqueued job.
#[derive(Clone)]
pub struct JobHandle {
    pub(crate) id: i64,
    pub(crate) direction: Direction,
    pub(crate) queue: MessageQueue,
}

impl std::fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle")
            .field("id", &self.id)
            .field("direction", &self.direction)
            .finish()
    }
}

impl JobHandle {
    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Waits for the job to complete or land in the failed set.
    ///
    /// Timing out leaves the job in the queue; it still runs.
    pub async fn wait(&self, timeout: Duration) -> Result<serde_json::Value, CourierError> {
        let (tx, rx) = oneshot::channel();
        self.queue.register_waiter(self.id, tx);

        // The job may have finished before the waiter was registered.
        let record = jobs::get(self.queue.db(), self.id).await?.ok_or_else(|| {
            CourierError::Internal(format!("job {} is no longer stored", self.id))
        })?;
        if matches!(record.status, JobStatus::Completed | JobStatus::Failed) {
            self.queue.forget_waiters(self.id);
        }
        match record.status {
            JobStatus::Completed => {
                let value = record
                    .result
                    .as_deref()
                    .map(serde_json::from_str::<serde_json::Value>)
                    .transpose()?
                    .unwrap_or(serde_json::Value::Null);
                return Ok(value);
            }
            JobStatus::Failed => {
                return Err(CourierError::JobFailed {
                    job_id: self.id,
                    message: record.last_error.unwrap_or_default(),
                });
            }
            JobStatus::Waiting | JobStatus::Active => {}
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(JobOutcome::Completed(value))) => Ok(value),
            Ok(Ok(JobOutcome::Failed(message))) => Err(CourierError::JobFailed {
                job_id: self.id,
                message,
            }),
            Ok(Err(_)) => Err(CourierError::Internal(format!(
                "queue shut down while waiting for job {}",
                self.id
            ))),
            Err(_) => Err(CourierError::Timeout { duration: timeout }),
        }
    }
}
