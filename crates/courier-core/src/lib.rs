// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Courier session gateway.
//!
//! This crate provides the error taxonomy, the shared data model, and the
//! trait seams (session store, transport) that the connection manager, queue,
//! and orchestrator are written against.

pub mod backoff;
pub mod bounded;
pub mod error;
pub mod traits;
pub mod types;

// Re-export key items at crate root for ergonomic imports.
pub use bounded::BoundedMap;
pub use error::CourierError;
pub use types::{
    AccountId, ConnectOutcome, Credentials, DeliveryStatus, Direction, DisconnectReason,
    HealthLevel, HealthStatus, InboundMessage, MessagePayload, QueueMessageData, SentMessage,
    SessionInfo, SessionStatus, SubsystemHealth,
};

pub use traits::{SessionStore, TransportConnector, TransportHandle, TransportSession};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_names_match_queues() {
        use std::str::FromStr;

        for direction in Direction::ALL {
            let parsed = Direction::from_str(&direction.to_string()).expect("should parse back");
            assert_eq!(parsed, direction);
            assert_eq!(direction.queue_name(), direction.to_string());
        }
    }

    #[test]
    fn all_traits_are_object_safe() {
        fn _store(_: &dyn SessionStore) {}
        fn _connector(_: &dyn TransportConnector) {}
        fn _handle(_: &dyn TransportHandle) {}
    }
}
