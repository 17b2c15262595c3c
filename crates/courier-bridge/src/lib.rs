// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! WebSocket transport for Courier.
//!
//! The chat protocol itself runs in a sidecar process; this crate speaks a
//! small JSON frame protocol to it, one socket per account.

pub mod connector;
pub mod protocol;

pub use connector::{BridgeConnector, BridgeHandle};
pub use protocol::{ClientFrame, ServerFrame};
