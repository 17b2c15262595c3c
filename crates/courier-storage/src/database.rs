// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Database connection management with PRAGMA setup, WAL mode, and lifecycle.
//!
//! All writes are serialized through tokio-rusqlite's single background thread.
//! The connection sits behind an [`ArcSwap`] so the health service can swap in a
//! fresh one without callers holding a lock.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use tracing::{debug, info, warn};

use courier_config::model::StorageConfig;
use courier_core::CourierError;

use crate::migrations;

/// Map a tokio-rusqlite call error into the storage variant.
pub fn map_tr_err(e: tokio_rusqlite::Error<rusqlite::Error>) -> CourierError {
    CourierError::storage(e)
}

/// Map a call whose closure failed with a non-rusqlite error.
fn map_call_err<E>(e: tokio_rusqlite::Error<E>) -> CourierError
where
    E: std::error::Error + Send + Sync + 'static,
{
    CourierError::storage(e)
}

#[derive(Debug, Clone)]
enum Target {
    File(String),
    Memory,
}

/// Handle to the SQLite job store.
pub struct Database {
    target: Target,
    wal_mode: bool,
    busy_timeout_ms: u64,
    conn: ArcSwap<tokio_rusqlite::Connection>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("target", &self.target)
            .field("wal_mode", &self.wal_mode)
            .finish_non_exhaustive()
    }
}

impl Database {
    /// Open (creating if needed) the database described by the storage config,
    /// apply PRAGMAs, and run pending migrations.
    pub async fn open(config: &StorageConfig) -> Result<Self, CourierError> {
        let target = Target::File(config.database_path.clone());
        let conn = connect(&target, config.wal_mode, config.busy_timeout_ms).await?;
        info!(path = %config.database_path, "job store opened");
        Ok(Self {
            target,
            wal_mode: config.wal_mode,
            busy_timeout_ms: config.busy_timeout_ms,
            conn: ArcSwap::from_pointee(conn),
        })
    }

    /// Open a private in-memory database. Reopening yields an empty one.
    pub async fn open_in_memory() -> Result<Self, CourierError> {
        let conn = connect(&Target::Memory, false, 5000).await?;
        Ok(Self {
            target: Target::Memory,
            wal_mode: false,
            busy_timeout_ms: 5000,
            conn: ArcSwap::from_pointee(conn),
        })
    }

    /// The current connection. Cheap; clones an `Arc`.
    pub fn connection(&self) -> Arc<tokio_rusqlite::Connection> {
        self.conn.load_full()
    }

    pub fn path(&self) -> Option<&str> {
        match &self.target {
            Target::File(path) => Some(path),
            Target::Memory => None,
        }
    }

    /// Round-trips `SELECT 1` and reports how long it took.
    pub async fn ping(&self) -> Result<Duration, CourierError> {
        let started = Instant::now();
        self.connection()
            .call(|conn| -> Result<(), rusqlite::Error> {
                conn.execute_batch("SELECT 1;")?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)?;
        Ok(started.elapsed())
    }

    /// Replace the connection with a freshly opened one.
    pub async fn reopen(&self) -> Result<(), CourierError> {
        let fresh = connect(&self.target, self.wal_mode, self.busy_timeout_ms).await?;
        let old = self.conn.swap(Arc::new(fresh));
        // In-flight calls on the old handle finish before its thread exits.
        if let Err(e) = (*old).clone().close().await {
            debug!(error = %e, "previous connection was already closed");
        }
        warn!(target = ?self.target, "job store connection reopened");
        Ok(())
    }

    /// Checkpoint the WAL and stop the connection thread. Later calls fail
    /// with a storage error until [`reopen`](Self::reopen).
    pub async fn close(&self) -> Result<(), CourierError> {
        let conn = self.connection();
        if self.wal_mode {
            conn.call(|conn| -> Result<(), rusqlite::Error> {
                conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)?;
            debug!("WAL checkpoint complete");
        }
        (*conn).clone().close().await.map_err(map_tr_err)?;
        Ok(())
    }
}

async fn connect(
    target: &Target,
    wal_mode: bool,
    busy_timeout_ms: u64,
) -> Result<tokio_rusqlite::Connection, CourierError> {
    let conn = match target {
        Target::File(path) => {
            if let Some(parent) = Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(CourierError::storage)?;
                }
            }
            tokio_rusqlite::Connection::open(path)
                .await
                .map_err(CourierError::storage)?
        }
        Target::Memory => tokio_rusqlite::Connection::open_in_memory()
            .await
            .map_err(CourierError::storage)?,
    };

    conn.call(move |conn| -> Result<(), rusqlite::Error> {
        if wal_mode {
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "synchronous", "NORMAL")?;
        }
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(Duration::from_millis(busy_timeout_ms))?;
        Ok(())
    })
    .await
    .map_err(map_tr_err)?;

    conn.call(|conn| migrations::run_migrations(conn))
        .await
        .map_err(map_call_err)?;

    Ok(conn)
}
