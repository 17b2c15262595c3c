// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Trait seams between Courier and its external collaborators.
//!
//! All traits use `#[async_trait]` so implementations can be held as
//! `Arc<dyn Trait>` and injected at construction time.

pub mod session_store;
pub mod transport;

pub use session_store::SessionStore;
pub use transport::{
    ConnectionState, RawContent, RawMessage, RawStatusUpdate, RawTransportEvent,
    TransportConnector, TransportHandle, TransportSession,
};
