// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Health and recovery for the Courier session gateway.
//!
//! Independent [`HealthProbe`]s cover the connection pool, the message
//! queues and the job store. [`HealthService`] aggregates them on a fixed
//! interval (worst subsystem wins) and runs bounded remediation when a
//! round is not healthy.

pub mod probe;
pub mod service;

pub use probe::{
    ConnectionProbe, HealthProbe, QueueProbe, StorageProbe, evaluate_connections, evaluate_queue,
};
pub use service::HealthService;
