// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Persistence layer for the Courier session gateway.
//!
//! Provides WAL-mode SQLite storage with embedded migrations for the durable
//! job queues, a single-writer concurrency model via `tokio-rusqlite`, and a
//! file-backed [`SessionStore`](courier_core::SessionStore) for per-account
//! credentials and message history.

pub mod database;
pub mod migrations;
pub mod models;
pub mod queries;
pub mod session_store;

pub use database::Database;
pub use models::*;
pub use session_store::FileSessionStore;
