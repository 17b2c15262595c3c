// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for Courier integration tests.
//!
//! Provides a scripted transport and an in-memory session store for fast,
//! deterministic, CI-runnable tests without a protocol sidecar.
//!
//! # Components
//!
//! - [`MockConnector`] - Transport whose sessions the test drives by hand
//! - [`MemorySessionStore`] - `SessionStore` backed by hash maps
//! - [`TestHarness`] - Initialized `Courier` over both, with a temp job store

pub mod harness;
pub mod memory_store;
pub mod mock_transport;

pub use harness::{TestHarness, fast_config};
pub use memory_store::MemorySessionStore;
pub use mock_transport::{MockConnector, MockHandle, OpenBehavior};
