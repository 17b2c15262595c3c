// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Durable message queues.
//!
//! Two independently configured queues, inbound and outbound, share one SQLite
//! job table so that enqueued-but-unprocessed work survives a restart. Each
//! direction has one handler, a dispatcher task, a concurrency semaphore and a
//! start-rate limiter. Failed attempts back off exponentially until the
//! attempt budget is spent, after which the job sits in the failed set until
//! [`MessageQueue::retry_failed`] is called.

pub mod handler;
pub mod job;
pub mod rate_limit;
mod worker;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Notify, Semaphore, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use courier_config::model::{QueueConfig, QueueSettings};
use courier_core::CourierError;
use courier_core::types::{Direction, QueueMessageData};
use courier_storage::queries::jobs::{self, now_ms};
use courier_storage::{Database, NewJob};

pub use handler::{FnHandler, JobHandler, handler_fn};
pub use job::{EnqueueOptions, JobHandle, QueueJob, QueueStats};

use job::JobOutcome;
use rate_limit::StartRateLimiter;

/// State of one queue direction.
pub(crate) struct Lane {
    pub(crate) direction: Direction,
    pub(crate) settings: QueueSettings,
    pub(crate) handler: OnceLock<Arc<dyn JobHandler>>,
    /// Set by an operator through `pause`.
    pub(crate) paused: AtomicBool,
    /// Set internally through `hold`, e.g. while sessions are restored.
    pub(crate) held: AtomicBool,
    /// Signalled on enqueue, resume, retry and handler registration.
    pub(crate) wake: Notify,
    pub(crate) limiter: tokio::sync::Mutex<StartRateLimiter>,
    pub(crate) permits: Arc<Semaphore>,
    pub(crate) completions: AtomicU64,
}

impl Lane {
    fn new(direction: Direction, settings: QueueSettings) -> Self {
        let limiter = StartRateLimiter::new(
            settings.rate_limit.max,
            Duration::from_millis(settings.rate_limit.window_ms),
        );
        Self {
            direction,
            permits: Arc::new(Semaphore::new(settings.concurrency.max(1))),
            settings,
            handler: OnceLock::new(),
            paused: AtomicBool::new(false),
            held: AtomicBool::new(false),
            wake: Notify::new(),
            limiter: tokio::sync::Mutex::new(limiter),
            completions: AtomicU64::new(0),
        }
    }

    pub(crate) fn dispatching(&self) -> bool {
        !self.paused.load(Ordering::Acquire) && !self.held.load(Ordering::Acquire)
    }
}

pub(crate) struct QueueInner {
    pub(crate) db: Arc<Database>,
    inbound: Lane,
    outbound: Lane,
    waiters: DashMap<i64, Vec<oneshot::Sender<JobOutcome>>>,
    pub(crate) keep_completed: usize,
    pub(crate) poll_interval: Duration,
    pub(crate) cancel: CancellationToken,
    started: AtomicBool,
    dispatchers: Mutex<Vec<JoinHandle<()>>>,
}

/// Handle to both queues. Cheap to clone.
#[derive(Clone)]
pub struct MessageQueue {
    pub(crate) inner: Arc<QueueInner>,
}

impl std::fmt::Debug for MessageQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageQueue")
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl MessageQueue {
    pub fn new(db: Arc<Database>, config: &QueueConfig) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                db,
                inbound: Lane::new(Direction::Inbound, config.inbound.clone()),
                outbound: Lane::new(Direction::Outbound, config.outbound.clone()),
                waiters: DashMap::new(),
                keep_completed: config.keep_completed,
                poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
                cancel: CancellationToken::new(),
                started: AtomicBool::new(false),
                dispatchers: Mutex::new(Vec::new()),
            }),
        }
    }

    pub(crate) fn lane(&self, direction: Direction) -> &Lane {
        match direction {
            Direction::Inbound => &self.inner.inbound,
            Direction::Outbound => &self.inner.outbound,
        }
    }

    pub(crate) fn db(&self) -> &Database {
        &self.inner.db
    }

    /// Installs the handler for a direction. Only one per direction.
    pub fn register_handler(
        &self,
        direction: Direction,
        handler: Arc<dyn JobHandler>,
    ) -> Result<(), CourierError> {
        let lane = self.lane(direction);
        lane.handler
            .set(handler)
            .map_err(|_| CourierError::HandlerAlreadyRegistered(direction))?;
        lane.wake.notify_one();
        debug!(queue = %direction, "handler registered");
        Ok(())
    }

    /// Returns jobs orphaned by a previous process to the ready set and
    /// starts the dispatchers. Returns how many jobs were recovered.
    pub async fn start(&self) -> Result<usize, CourierError> {
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return Ok(0);
        }

        let mut recovered = 0;
        for direction in Direction::ALL {
            let n = jobs::recover_stale(self.db(), direction.queue_name(), now_ms()).await?;
            if n > 0 {
                warn!(queue = %direction, recovered = n, "returned stale active jobs to waiting");
            }
            recovered += n;
            jobs::prune_completed(self.db(), direction.queue_name(), self.inner.keep_completed)
                .await?;
        }

        let mut dispatchers = self
            .inner
            .dispatchers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for direction in Direction::ALL {
            let queue = self.clone();
            dispatchers.push(tokio::spawn(async move {
                queue.dispatch_loop(direction).await;
            }));
        }
        info!(recovered, "message queues started");
        Ok(recovered)
    }

    pub fn is_running(&self) -> bool {
        self.inner.started.load(Ordering::Acquire) && !self.inner.cancel.is_cancelled()
    }

    /// Persists a job. Fails fast when the store is unavailable.
    pub async fn enqueue(
        &self,
        direction: Direction,
        mut data: QueueMessageData,
        opts: EnqueueOptions,
    ) -> Result<JobHandle, CourierError> {
        let lane = self.lane(direction);
        data.direction = direction;
        if let Some(priority) = opts.priority {
            data.priority = priority;
        }
        if let Some(delay) = opts.delay {
            data.delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        }
        data.attempt_count = 0;

        let delay_ms = i64::try_from(data.delay_ms).unwrap_or(i64::MAX);
        let job = NewJob {
            queue: direction.queue_name().to_string(),
            payload: serde_json::to_string(&data)?,
            priority: data.priority,
            run_at: now_ms().saturating_add(delay_ms),
            max_attempts: lane.settings.attempts.max(1),
            backoff_ms: lane.settings.backoff_ms,
        };
        let id = jobs::enqueue(self.db(), job).await?;
        lane.wake.notify_one();
        debug!(
            job_id = id,
            queue = %direction,
            account_id = %data.account_id,
            priority = data.priority,
            delay_ms = data.delay_ms,
            "job enqueued"
        );
        Ok(JobHandle {
            id,
            direction,
            queue: self.clone(),
        })
    }

    /// Stops starting new jobs in one direction. In-flight jobs finish.
    ///
    /// Only `resume` lifts an operator pause; recovery never does.
    pub fn pause(&self, direction: Direction) {
        if !self.lane(direction).paused.swap(true, Ordering::AcqRel) {
            info!(queue = %direction, "queue paused");
        }
    }

    pub fn resume(&self, direction: Direction) {
        let lane = self.lane(direction);
        if lane.paused.swap(false, Ordering::AcqRel) {
            info!(queue = %direction, "queue resumed");
        }
        lane.wake.notify_one();
    }

    /// True when an operator paused this direction.
    pub fn is_paused(&self, direction: Direction) -> bool {
        self.lane(direction).paused.load(Ordering::Acquire)
    }

    /// Holds dispatch for an internal reason. Independent of `pause`.
    pub fn hold(&self, direction: Direction) {
        if !self.lane(direction).held.swap(true, Ordering::AcqRel) {
            debug!(queue = %direction, "queue held");
        }
    }

    /// Lifts an internal hold. Returns false when the lane was not held.
    pub fn release(&self, direction: Direction) -> bool {
        let lane = self.lane(direction);
        let was_held = lane.held.swap(false, Ordering::AcqRel);
        if was_held {
            debug!(queue = %direction, "queue released");
        }
        lane.wake.notify_one();
        was_held
    }

    pub fn is_held(&self, direction: Direction) -> bool {
        self.lane(direction).held.load(Ordering::Acquire)
    }

    pub async fn stats(&self, direction: Direction) -> Result<QueueStats, CourierError> {
        let counts = jobs::counts(self.db(), direction.queue_name(), now_ms()).await?;
        Ok(QueueStats {
            waiting: counts.waiting,
            active: counts.active,
            completed: counts.completed,
            failed: counts.failed,
            delayed: counts.delayed,
            paused: !self.lane(direction).dispatching(),
        })
    }

    /// Moves every job currently in the failed set back to ready.
    pub async fn retry_failed(&self, direction: Direction) -> Result<usize, CourierError> {
        let moved = jobs::retry_failed(self.db(), direction.queue_name(), now_ms()).await?;
        if moved > 0 {
            info!(queue = %direction, moved, "failed jobs re-queued");
            self.lane(direction).wake.notify_one();
        }
        Ok(moved)
    }

    /// Stops the dispatchers and waits up to `grace` for in-flight jobs.
    pub async fn shutdown(&self, grace: Duration) {
        self.inner.cancel.cancel();
        let dispatchers: Vec<_> = self
            .inner
            .dispatchers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for dispatcher in dispatchers {
            let _ = dispatcher.await;
        }

        let deadline = tokio::time::Instant::now() + grace;
        for direction in Direction::ALL {
            let lane = self.lane(direction);
            let all = u32::try_from(lane.settings.concurrency.max(1)).unwrap_or(u32::MAX);
            if tokio::time::timeout_at(deadline, lane.permits.acquire_many(all))
                .await
                .is_err()
            {
                warn!(
                    queue = %direction,
                    in_flight = lane.settings.concurrency - lane.permits.available_permits(),
                    "grace period elapsed with jobs still running"
                );
            }
        }
        self.inner.waiters.clear();
        info!("message queues stopped");
    }

    pub(crate) fn register_waiter(&self, id: i64, tx: oneshot::Sender<JobOutcome>) {
        self.inner.waiters.entry(id).or_default().push(tx);
    }

    /// Drops waiters of a job that already reached a terminal state.
    pub(crate) fn forget_waiters(&self, id: i64) {
        self.inner.waiters.remove(&id);
    }

    pub(crate) fn resolve(&self, id: i64, outcome: JobOutcome) {
        if let Some((_, senders)) = self.inner.waiters.remove(&id) {
            for tx in senders {
                let _ = tx.send(outcome.clone());
            }
        }
    }
}
