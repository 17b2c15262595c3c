// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Session layer of the Courier gateway.
//!
//! [`ConnectionManager`] keeps at most one transport session per account,
//! reconnects dropped sessions with exponential backoff and republishes
//! transport events as [`courier_bus::DomainEvent`]s through the
//! [`translator`].

pub mod cache;
pub mod manager;
pub mod translator;

pub use manager::{ConnectionCounts, ConnectionManager};
