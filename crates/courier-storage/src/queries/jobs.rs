// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Job table operations backing the durable queues.
//!
//! Every state change is a single statement or a single transaction on the
//! writer thread, so concurrent workers never observe a half-applied move.

use std::str::FromStr;
use std::time::Duration;

use rusqlite::{OptionalExtension, Row, params};

use courier_core::CourierError;
use courier_core::backoff::exponential_delay;

use crate::database::{Database, map_tr_err};
use crate::models::{FailOutcome, JobCounts, JobRecord, JobStatus, NewJob};

const NOW: &str = "strftime('%Y-%m-%dT%H:%M:%fZ', 'now')";

const COLUMNS: &str = "id, queue, payload, priority, status, attempts, max_attempts,
     backoff_ms, run_at, last_error, result, created_at, updated_at";

fn row_to_job(row: &Row<'_>) -> Result<JobRecord, rusqlite::Error> {
    let status: String = row.get(4)?;
    let status = JobStatus::from_str(&status).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(JobRecord {
        id: row.get(0)?,
        queue: row.get(1)?,
        payload: row.get(2)?,
        priority: row.get(3)?,
        status,
        attempts: row.get(5)?,
        max_attempts: row.get(6)?,
        backoff_ms: row.get::<_, i64>(7)?.max(0) as u64,
        run_at: row.get(8)?,
        last_error: row.get(9)?,
        result: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

/// Current time in unix epoch milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Insert a waiting job. Returns its id.
pub async fn enqueue(db: &Database, job: NewJob) -> Result<i64, CourierError> {
    db.connection()
        .call(move |conn| -> Result<i64, rusqlite::Error> {
            conn.execute(
                "INSERT INTO jobs (queue, payload, priority, run_at, max_attempts, backoff_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    job.queue,
                    job.payload,
                    job.priority,
                    job.run_at,
                    job.max_attempts,
                    job.backoff_ms as i64
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
        .map_err(map_tr_err)
}

/// Claim the next ready job of a queue and mark it active.
///
/// Ready means waiting with `run_at <= now`; lower priority values go first,
/// ties in insertion order.
pub async fn dequeue(
    db: &Database,
    queue: &str,
    now_ms: i64,
) -> Result<Option<JobRecord>, CourierError> {
    let queue = queue.to_string();
    db.connection()
        .call(move |conn| -> Result<Option<JobRecord>, rusqlite::Error> {
            let tx = conn.transaction()?;
            let job = tx
                .query_row(
                    &format!(
                        "SELECT {COLUMNS} FROM jobs
                         WHERE queue = ?1 AND status = 'waiting' AND run_at <= ?2
                         ORDER BY priority ASC, id ASC
                         LIMIT 1"
                    ),
                    params![queue, now_ms],
                    row_to_job,
                )
                .optional()?;
            let Some(job) = job else {
                tx.commit()?;
                return Ok(None);
            };
            tx.execute(
                &format!("UPDATE jobs SET status = 'active', updated_at = {NOW} WHERE id = ?1"),
                params![job.id],
            )?;
            tx.commit()?;
            Ok(Some(JobRecord {
                status: JobStatus::Active,
                ..job
            }))
        })
        .await
        .map_err(map_tr_err)
}

/// Mark an active job completed and store its result.
pub async fn complete(db: &Database, id: i64, result: &str) -> Result<(), CourierError> {
    let result = result.to_string();
    db.connection()
        .call(move |conn| -> Result<(), rusqlite::Error> {
            conn.execute(
                &format!(
                    "UPDATE jobs SET status = 'completed', result = ?1, last_error = NULL,
                     updated_at = {NOW}, finished_at = {NOW}
                     WHERE id = ?2"
                ),
                params![result, id],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Record a failed attempt.
///
/// Increments the attempt counter. A non-retryable failure, or one that uses
/// up the last attempt, moves the job to the failed set; otherwise it goes
/// back to waiting after `backoff × 2^(attempts-1)`.
pub async fn fail(
    db: &Database,
    id: i64,
    error: &str,
    retryable: bool,
    now_ms: i64,
) -> Result<FailOutcome, CourierError> {
    let error = error.to_string();
    db.connection()
        .call(move |conn| -> Result<FailOutcome, rusqlite::Error> {
            let tx = conn.transaction()?;
            let (attempts, max_attempts, backoff_ms): (u32, u32, i64) = tx.query_row(
                "SELECT attempts, max_attempts, backoff_ms FROM jobs WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )?;
            let attempts = attempts + 1;

            let outcome = if !retryable || attempts >= max_attempts {
                tx.execute(
                    &format!(
                        "UPDATE jobs SET status = 'failed', attempts = ?1, last_error = ?2,
                         updated_at = {NOW}, finished_at = {NOW}
                         WHERE id = ?3"
                    ),
                    params![attempts, error, id],
                )?;
                FailOutcome::Failed { attempts }
            } else {
                let delay = exponential_delay(
                    Duration::from_millis(backoff_ms.max(0) as u64),
                    attempts,
                    None,
                );
                let run_at = now_ms.saturating_add(delay.as_millis().min(i64::MAX as u128) as i64);
                tx.execute(
                    &format!(
                        "UPDATE jobs SET status = 'waiting', attempts = ?1, last_error = ?2,
                         run_at = ?3, updated_at = {NOW}
                         WHERE id = ?4"
                    ),
                    params![attempts, error, run_at, id],
                )?;
                FailOutcome::Retrying { attempts, delay }
            };
            tx.commit()?;
            Ok(outcome)
        })
        .await
        .map_err(map_tr_err)
}

/// Move every failed job of a queue back to waiting with a fresh attempt
/// budget. One statement, so exactly the jobs failed at call time move.
pub async fn retry_failed(db: &Database, queue: &str, now_ms: i64) -> Result<usize, CourierError> {
    let queue = queue.to_string();
    db.connection()
        .call(move |conn| -> Result<usize, rusqlite::Error> {
            conn.execute(
                &format!(
                    "UPDATE jobs SET status = 'waiting', attempts = 0, run_at = ?2,
                     finished_at = NULL, updated_at = {NOW}
                     WHERE queue = ?1 AND status = 'failed'"
                ),
                params![queue, now_ms],
            )
        })
        .await
        .map_err(map_tr_err)
}

/// Return jobs left active by a previous process to waiting.
pub async fn recover_stale(db: &Database, queue: &str, now_ms: i64) -> Result<usize, CourierError> {
    let queue = queue.to_string();
    db.connection()
        .call(move |conn| -> Result<usize, rusqlite::Error> {
            conn.execute(
                &format!(
                    "UPDATE jobs SET status = 'waiting', run_at = ?2, updated_at = {NOW}
                     WHERE queue = ?1 AND status = 'active'"
                ),
                params![queue, now_ms],
            )
        })
        .await
        .map_err(map_tr_err)
}

/// Delete all but the newest `keep` completed jobs of a queue.
pub async fn prune_completed(db: &Database, queue: &str, keep: usize) -> Result<usize, CourierError> {
    let queue = queue.to_string();
    let keep = keep.min(i64::MAX as usize) as i64;
    db.connection()
        .call(move |conn| -> Result<usize, rusqlite::Error> {
            conn.execute(
                "DELETE FROM jobs
                 WHERE queue = ?1 AND status = 'completed' AND id NOT IN (
                     SELECT id FROM jobs WHERE queue = ?1 AND status = 'completed'
                     ORDER BY id DESC LIMIT ?2
                 )",
                params![queue, keep],
            )
        })
        .await
        .map_err(map_tr_err)
}

/// Per-status counts; `delayed` is split out of waiting by `run_at`.
pub async fn counts(db: &Database, queue: &str, now_ms: i64) -> Result<JobCounts, CourierError> {
    let queue = queue.to_string();
    db.connection()
        .call(move |conn| -> Result<JobCounts, rusqlite::Error> {
            conn.query_row(
                "SELECT
                    COALESCE(SUM(status = 'waiting' AND run_at <= ?2), 0),
                    COALESCE(SUM(status = 'waiting' AND run_at > ?2), 0),
                    COALESCE(SUM(status = 'active'), 0),
                    COALESCE(SUM(status = 'completed'), 0),
                    COALESCE(SUM(status = 'failed'), 0)
                 FROM jobs WHERE queue = ?1",
                params![queue, now_ms],
                |row| {
                    let get = |i: usize| -> Result<u64, rusqlite::Error> {
                        Ok(row.get::<_, i64>(i)?.max(0) as u64)
                    };
                    Ok(JobCounts {
                        waiting: get(0)?,
                        delayed: get(1)?,
                        active: get(2)?,
                        completed: get(3)?,
                        failed: get(4)?,
                    })
                },
            )
        })
        .await
        .map_err(map_tr_err)
}

/// Earliest `run_at` among waiting jobs, for sleeping until the next one.
pub async fn next_run_at(db: &Database, queue: &str) -> Result<Option<i64>, CourierError> {
    let queue = queue.to_string();
    db.connection()
        .call(move |conn| -> Result<Option<i64>, rusqlite::Error> {
            conn.query_row(
                "SELECT MIN(run_at) FROM jobs WHERE queue = ?1 AND status = 'waiting'",
                params![queue],
                |row| row.get(0),
            )
        })
        .await
        .map_err(map_tr_err)
}

pub async fn get(db: &Database, id: i64) -> Result<Option<JobRecord>, CourierError> {
    db.connection()
        .call(move |conn| -> Result<Option<JobRecord>, rusqlite::Error> {
            conn.query_row(
                &format!("SELECT {COLUMNS} FROM jobs WHERE id = ?1"),
                params![id],
                row_to_job,
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

/// Jobs of one status, oldest first.
pub async fn list_by_status(
    db: &Database,
    queue: &str,
    status: JobStatus,
    limit: usize,
) -> Result<Vec<JobRecord>, CourierError> {
    let queue = queue.to_string();
    let status = status.to_string();
    let limit = limit.min(i64::MAX as usize) as i64;
    db.connection()
        .call(move |conn| -> Result<Vec<JobRecord>, rusqlite::Error> {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM jobs WHERE queue = ?1 AND status = ?2
                 ORDER BY id ASC LIMIT ?3"
            ))?;
            let rows = stmt.query_map(params![queue, status, limit], row_to_job)?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(queue: &str, priority: i32, run_at: i64) -> NewJob {
        NewJob {
            queue: queue.to_string(),
            payload: "{}".to_string(),
            priority,
            run_at,
            max_attempts: 3,
            backoff_ms: 1000,
        }
    }

    async fn db() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    #[tokio::test]
    async fn dequeue_orders_by_priority_then_insertion() {
        let db = db().await;
        let low = enqueue(&db, job("outbound", 5, 0)).await.unwrap();
        let first_high = enqueue(&db, job("outbound", 1, 0)).await.unwrap();
        let second_high = enqueue(&db, job("outbound", 1, 0)).await.unwrap();

        let order: Vec<i64> = [
            dequeue(&db, "outbound", 10).await.unwrap(),
            dequeue(&db, "outbound", 10).await.unwrap(),
            dequeue(&db, "outbound", 10).await.unwrap(),
        ]
        .into_iter()
        .map(|j| j.unwrap().id)
        .collect();
        assert_eq!(order, vec![first_high, second_high, low]);
        assert!(dequeue(&db, "outbound", 10).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delayed_jobs_are_not_ready_early() {
        let db = db().await;
        enqueue(&db, job("outbound", 0, 300_000)).await.unwrap();
        assert!(dequeue(&db, "outbound", 299_999).await.unwrap().is_none());
        let counts = counts(&db, "outbound", 0).await.unwrap();
        assert_eq!(counts.delayed, 1);
        assert_eq!(counts.waiting, 0);
        assert_eq!(next_run_at(&db, "outbound").await.unwrap(), Some(300_000));
        assert!(dequeue(&db, "outbound", 300_000).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn queues_are_isolated() {
        let db = db().await;
        enqueue(&db, job("inbound", 0, 0)).await.unwrap();
        assert!(dequeue(&db, "outbound", 10).await.unwrap().is_none());
        assert!(dequeue(&db, "inbound", 10).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn failure_backs_off_exponentially_then_fails() {
        let db = db().await;
        let id = enqueue(&db, job("outbound", 0, 0)).await.unwrap();

        dequeue(&db, "outbound", 0).await.unwrap();
        let first = fail(&db, id, "boom", true, 0).await.unwrap();
        assert_eq!(
            first,
            FailOutcome::Retrying {
                attempts: 1,
                delay: Duration::from_millis(1000)
            }
        );
        assert!(dequeue(&db, "outbound", 999).await.unwrap().is_none());

        dequeue(&db, "outbound", 1000).await.unwrap().unwrap();
        let second = fail(&db, id, "boom", true, 1000).await.unwrap();
        assert_eq!(
            second,
            FailOutcome::Retrying {
                attempts: 2,
                delay: Duration::from_millis(2000)
            }
        );

        dequeue(&db, "outbound", 3000).await.unwrap().unwrap();
        let third = fail(&db, id, "boom", true, 3000).await.unwrap();
        assert_eq!(third, FailOutcome::Failed { attempts: 3 });

        let record = get(&db, id).await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(record.last_error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn non_retryable_failure_is_terminal() {
        let db = db().await;
        let id = enqueue(&db, job("outbound", 0, 0)).await.unwrap();
        dequeue(&db, "outbound", 0).await.unwrap();
        let outcome = fail(&db, id, "no active connection", false, 0).await.unwrap();
        assert_eq!(outcome, FailOutcome::Failed { attempts: 1 });
    }

    #[tokio::test]
    async fn retry_failed_moves_exactly_the_failed_set() {
        let db = db().await;
        for _ in 0..3 {
            let id = enqueue(&db, job("outbound", 0, 0)).await.unwrap();
            dequeue(&db, "outbound", 0).await.unwrap();
            fail(&db, id, "x", false, 0).await.unwrap();
        }
        enqueue(&db, job("outbound", 0, 0)).await.unwrap();

        assert_eq!(retry_failed(&db, "outbound", 5).await.unwrap(), 3);
        let counts = counts(&db, "outbound", 5).await.unwrap();
        assert_eq!(counts.failed, 0);
        assert_eq!(counts.waiting, 4);
        let retried = list_by_status(&db, "outbound", JobStatus::Waiting, 10)
            .await
            .unwrap();
        assert!(retried.iter().all(|j| j.attempts == 0));
        assert_eq!(retry_failed(&db, "outbound", 5).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn stale_active_jobs_are_recovered() {
        let db = db().await;
        enqueue(&db, job("outbound", 0, 0)).await.unwrap();
        dequeue(&db, "outbound", 0).await.unwrap();
        assert_eq!(recover_stale(&db, "outbound", 0).await.unwrap(), 1);
        assert!(dequeue(&db, "outbound", 0).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn prune_keeps_newest_completed() {
        let db = db().await;
        let mut ids = Vec::new();
        for _ in 0..5 {
            let id = enqueue(&db, job("outbound", 0, 0)).await.unwrap();
            dequeue(&db, "outbound", 0).await.unwrap();
            complete(&db, id, "{}").await.unwrap();
            ids.push(id);
        }
        assert_eq!(prune_completed(&db, "outbound", 2).await.unwrap(), 3);
        let kept = list_by_status(&db, "outbound", JobStatus::Completed, 10)
            .await
            .unwrap();
        assert_eq!(
            kept.iter().map(|j| j.id).collect::<Vec<_>>(),
            ids[3..].to_vec()
        );
    }
}
