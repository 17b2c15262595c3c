// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Dispatcher loop and job execution.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use tokio::sync::OwnedSemaphorePermit;
use tracing::{debug, error, info, warn};

use courier_core::CourierError;
use courier_core::types::{Direction, QueueMessageData};
use courier_storage::queries::jobs::{self, now_ms};
use courier_storage::{FailOutcome, JobRecord};

use crate::MessageQueue;
use crate::handler::JobHandler;
use crate::job::{JobOutcome, QueueJob};

/// Prune completed rows after this many completions per direction.
const PRUNE_EVERY: u64 = 25;

impl MessageQueue {
    /// Claims ready jobs for one direction until shutdown.
    ///
    /// Order per claim: concurrency permit, then rate-limit slot, then the
    /// store. A slot taken for an empty queue is handed back.
    pub(crate) async fn dispatch_loop(&self, direction: Direction) {
        let lane = self.lane(direction);
        let cancel = self.inner.cancel.clone();
        let poll = self.inner.poll_interval;
        debug!(queue = %direction, concurrency = lane.settings.concurrency, "dispatcher running");

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let handler = match lane.handler.get() {
                Some(handler) if lane.dispatching() => handler.clone(),
                _ => {
                    if !self.idle(direction, poll).await {
                        break;
                    }
                    continue;
                }
            };

            let permit = tokio::select! {
                permit = lane.permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = cancel.cancelled() => break,
            };
            // A pause may have landed while waiting for the permit.
            if !lane.dispatching() {
                drop(permit);
                continue;
            }

            let limited = lane.limiter.lock().await.try_acquire(Instant::now());
            if let Err(wait) = limited {
                drop(permit);
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = cancel.cancelled() => break,
                }
                continue;
            }

            match jobs::dequeue(self.db(), direction.queue_name(), now_ms()).await {
                Ok(Some(record)) => {
                    let queue = self.clone();
                    tokio::spawn(async move {
                        queue.run_job(direction, handler, record, permit).await;
                    });
                }
                Ok(None) => {
                    lane.limiter.lock().await.refund();
                    drop(permit);
                    let nap = self.time_until_next(direction, poll).await;
                    if !self.idle(direction, nap).await {
                        break;
                    }
                }
                Err(e) => {
                    lane.limiter.lock().await.refund();
                    drop(permit);
                    warn!(queue = %direction, error = %e, "dequeue failed");
                    if !self.idle(direction, poll).await {
                        break;
                    }
                }
            }
        }
        debug!(queue = %direction, "dispatcher stopped");
    }

    /// Sleeps until woken, `max` elapses, or shutdown. False on shutdown.
    async fn idle(&self, direction: Direction, max: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(max) => true,
            _ = self.lane(direction).wake.notified() => true,
            _ = self.inner.cancel.cancelled() => false,
        }
    }

    /// How long until the earliest delayed job is due, capped at `poll`.
    async fn time_until_next(&self, direction: Direction, poll: Duration) -> Duration {
        match jobs::next_run_at(self.db(), direction.queue_name()).await {
            Ok(Some(run_at)) => {
                let due_in = u64::try_from(run_at - now_ms()).unwrap_or(0);
                Duration::from_millis(due_in.max(1)).min(poll)
            }
            _ => poll,
        }
    }

    async fn run_job(
        &self,
        direction: Direction,
        handler: Arc<dyn JobHandler>,
        record: JobRecord,
        _permit: OwnedSemaphorePermit,
    ) {
        let id = record.id;
        let mut data: QueueMessageData = match serde_json::from_str(&record.payload) {
            Ok(data) => data,
            Err(e) => {
                error!(job_id = id, queue = %direction, error = %e, "undecodable job payload");
                self.record_failure(direction, id, CourierError::from(e)).await;
                return;
            }
        };
        data.attempt_count = record.attempts;
        let job = QueueJob {
            id,
            direction,
            data,
            attempt: record.attempts + 1,
            max_attempts: record.max_attempts,
        };
        debug!(
            job_id = id,
            queue = %direction,
            attempt = job.attempt,
            max_attempts = job.max_attempts,
            "processing job"
        );

        // A panicking handler counts as a failed attempt instead of leaving
        // the row active until the next restart.
        let result = tokio::spawn(async move { handler.handle(&job).await })
            .await
            .unwrap_or_else(|e| Err(CourierError::Internal(format!("job handler panicked: {e}"))));

        match result {
            Ok(value) => self.record_success(direction, id, value).await,
            Err(err) => self.record_failure(direction, id, err).await,
        }
    }

    async fn record_success(&self, direction: Direction, id: i64, value: serde_json::Value) {
        if let Err(e) = jobs::complete(self.db(), id, &value.to_string()).await {
            error!(job_id = id, queue = %direction, error = %e, "could not mark job completed");
            return;
        }
        debug!(job_id = id, queue = %direction, "job completed");
        self.resolve(id, JobOutcome::Completed(value));

        let lane = self.lane(direction);
        if (lane.completions.fetch_add(1, Ordering::Relaxed) + 1) % PRUNE_EVERY == 0 {
            match jobs::prune_completed(self.db(), direction.queue_name(), self.inner.keep_completed)
                .await
            {
                Ok(0) => {}
                Ok(pruned) => debug!(queue = %direction, pruned, "pruned completed jobs"),
                Err(e) => warn!(queue = %direction, error = %e, "pruning completed jobs failed"),
            }
        }
    }

    async fn record_failure(&self, direction: Direction, id: i64, err: CourierError) {
        let retryable = err.is_retryable();
        let message = err.to_string();
        match jobs::fail(self.db(), id, &message, retryable, now_ms()).await {
            Ok(FailOutcome::Retrying { attempts, delay }) => {
                warn!(
                    job_id = id,
                    queue = %direction,
                    attempts,
                    retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %message,
                    "job attempt failed, retry scheduled"
                );
            }
            Ok(FailOutcome::Failed { attempts }) => {
                if retryable {
                    warn!(job_id = id, queue = %direction, attempts, error = %message, "job exhausted its attempts");
                } else {
                    info!(job_id = id, queue = %direction, error = %message, "job failed permanently");
                }
                self.resolve(id, JobOutcome::Failed(message));
            }
            Err(e) => {
                error!(job_id = id, queue = %direction, error = %e, "could not record job failure");
            }
        }
    }
}
