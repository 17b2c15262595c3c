// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Subsystem probes.
//!
//! Each probe reports one [`SubsystemHealth`] and knows the bounded
//! remediation for its own subsystem. Threshold logic lives in pure
//! `evaluate_*` functions so it can be checked without live components.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{info, warn};

use courier_config::model::HealthConfig;
use courier_core::types::{Direction, HealthLevel, SubsystemHealth};
use courier_queue::{MessageQueue, QueueStats};
use courier_session::{ConnectionCounts, ConnectionManager};
use courier_storage::Database;

/// One independently checked subsystem.
#[async_trait]
pub trait HealthProbe: Send + Sync + 'static {
    /// Key of this subsystem in the composite report.
    fn name(&self) -> &'static str;

    async fn probe(&self) -> SubsystemHealth;

    /// Remediates a non-healthy subsystem. Returns a description of every
    /// action taken; an empty list means nothing was done.
    async fn recover(&self, _current: &SubsystemHealth) -> Vec<String> {
        Vec::new()
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Connected/total ratio check. No registered accounts is healthy.
pub fn evaluate_connections(counts: ConnectionCounts, min_ratio: f64) -> SubsystemHealth {
    if counts.total == 0 {
        return SubsystemHealth::healthy();
    }
    #[allow(clippy::cast_precision_loss)]
    let ratio = counts.connected as f64 / counts.total as f64;
    if ratio < min_ratio {
        return SubsystemHealth::degraded(format!(
            "{}/{} sessions connected",
            counts.connected, counts.total
        ));
    }
    SubsystemHealth::healthy()
}

/// Queue thresholds per direction. A paused queue is not a fault.
pub fn evaluate_queue(
    stats: &[(Direction, QueueStats)],
    max_failed: u64,
    max_active: u64,
) -> SubsystemHealth {
    let mut issues = Vec::new();
    for (direction, s) in stats {
        if s.failed > max_failed {
            issues.push(format!("{direction}: {} failed jobs (max {max_failed})", s.failed));
        }
        if s.active > max_active {
            issues.push(format!("{direction}: {} active jobs (max {max_active})", s.active));
        }
    }
    if issues.is_empty() {
        SubsystemHealth::healthy()
    } else {
        SubsystemHealth::degraded(issues.join("; "))
    }
}

pub struct ConnectionProbe {
    manager: ConnectionManager,
    min_ratio: f64,
}

impl ConnectionProbe {
    pub fn new(manager: ConnectionManager, settings: &HealthConfig) -> Self {
        Self {
            manager,
            min_ratio: settings.min_connected_ratio,
        }
    }
}

#[async_trait]
impl HealthProbe for ConnectionProbe {
    fn name(&self) -> &'static str {
        "connections"
    }

    async fn probe(&self) -> SubsystemHealth {
        let started = Instant::now();
        if !self.manager.is_running() {
            return SubsystemHealth::unhealthy("connection manager not running");
        }
        evaluate_connections(self.manager.connection_counts(), self.min_ratio)
            .with_latency(elapsed_ms(started))
    }
}

pub struct QueueProbe {
    queue: MessageQueue,
    max_failed: u64,
    max_active: u64,
}

impl QueueProbe {
    pub fn new(queue: MessageQueue, settings: &HealthConfig) -> Self {
        Self {
            queue,
            max_failed: settings.max_failed_jobs,
            max_active: settings.max_active_jobs,
        }
    }
}

#[async_trait]
impl HealthProbe for QueueProbe {
    fn name(&self) -> &'static str {
        "queue"
    }

    async fn probe(&self) -> SubsystemHealth {
        let started = Instant::now();
        if !self.queue.is_running() {
            return SubsystemHealth::unhealthy("message queue not running");
        }
        let mut stats = Vec::with_capacity(Direction::ALL.len());
        for direction in Direction::ALL {
            match self.queue.stats(direction).await {
                Ok(s) => stats.push((direction, s)),
                Err(e) => {
                    return SubsystemHealth::unhealthy(format!("{direction} stats unavailable: {e}"))
                        .with_latency(elapsed_ms(started));
                }
            }
        }
        evaluate_queue(&stats, self.max_failed, self.max_active).with_latency(elapsed_ms(started))
    }

    /// Lifts internal holds left behind, e.g. by an interrupted session
    /// restore. Operator pauses are left alone.
    async fn recover(&self, _current: &SubsystemHealth) -> Vec<String> {
        let mut actions = Vec::new();
        for direction in Direction::ALL {
            if self.queue.is_paused(direction) {
                continue;
            }
            if self.queue.release(direction) {
                actions.push(format!("released held {direction} queue"));
            }
        }
        actions
    }
}

pub struct StorageProbe {
    db: Arc<Database>,
}

impl StorageProbe {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl HealthProbe for StorageProbe {
    fn name(&self) -> &'static str {
        "storage"
    }

    async fn probe(&self) -> SubsystemHealth {
        match self.db.ping().await {
            Ok(rtt) => SubsystemHealth::healthy()
                .with_latency(u64::try_from(rtt.as_millis()).unwrap_or(u64::MAX)),
            Err(e) => SubsystemHealth::unhealthy(format!("job store unreachable: {e}")),
        }
    }

    async fn recover(&self, current: &SubsystemHealth) -> Vec<String> {
        if current.status != HealthLevel::Unhealthy {
            return Vec::new();
        }
        match self.db.reopen().await {
            Ok(()) => {
                info!("job store connection reopened by recovery");
                vec!["reopened job store connection".to_string()]
            }
            Err(e) => {
                warn!(error = %e, "job store reopen failed");
                vec![format!("job store reopen failed: {e}")]
            }
        }
    }
}
