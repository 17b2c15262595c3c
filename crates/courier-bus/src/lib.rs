// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Internal typed event bus.
//!
//! The session layer publishes a closed set of [`DomainEvent`]s; subscribers
//! (the orchestrator's inbound pump, tests, future integrations) never see
//! transport shapes. Delivery is broadcast: every subscriber gets every event
//! published after it subscribed. A subscriber that falls behind the bus
//! capacity loses the oldest events and is told how many.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

use courier_core::types::{
    AccountId, DeliveryStatus, DisconnectReason, InboundMessage, SessionStatus,
};

/// Everything the session layer reports to the rest of the system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DomainEvent {
    /// A session changed state. `qr` is set when a new challenge is available.
    #[serde(rename_all = "camelCase")]
    ConnectionState {
        account_id: AccountId,
        status: SessionStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        qr: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<DisconnectReason>,
    },
    MessageReceived {
        message: InboundMessage,
    },
    #[serde(rename_all = "camelCase")]
    MessageStatus {
        account_id: AccountId,
        chat_id: String,
        message_id: String,
        status: DeliveryStatus,
    },
    #[serde(rename_all = "camelCase")]
    MessageDeleted {
        account_id: AccountId,
        chat_id: String,
        message_ids: Vec<String>,
    },
}

impl DomainEvent {
    pub fn account_id(&self) -> &AccountId {
        match self {
            DomainEvent::ConnectionState { account_id, .. }
            | DomainEvent::MessageStatus { account_id, .. }
            | DomainEvent::MessageDeleted { account_id, .. } => account_id,
            DomainEvent::MessageReceived { message } => &message.account_id,
        }
    }

    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            DomainEvent::ConnectionState { .. } => "connection_state",
            DomainEvent::MessageReceived { .. } => "message_received",
            DomainEvent::MessageStatus { .. } => "message_status",
            DomainEvent::MessageDeleted { .. } => "message_deleted",
        }
    }
}

/// A published event with its envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: Uuid,
    pub published_at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: DomainEvent,
}

/// Cloneable handle to the broadcast bus.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Envelope>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publishes an event, returning how many subscribers received it.
    ///
    /// Publishing with no subscribers is not an error.
    pub fn publish(&self, event: DomainEvent) -> usize {
        let envelope = Envelope {
            id: Uuid::new_v4(),
            published_at: Utc::now(),
            event,
        };
        debug!(
            event_id = %envelope.id,
            kind = envelope.event.kind(),
            account_id = %envelope.event.account_id(),
            "publishing domain event"
        );
        self.tx.send(envelope).unwrap_or(0)
    }

    pub fn subscribe(&self) -> EventSubscriber {
        EventSubscriber {
            rx: self.tx.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Receiving side of the bus.
#[derive(Debug)]
pub struct EventSubscriber {
    rx: broadcast::Receiver<Envelope>,
}

impl EventSubscriber {
    /// Waits for the next event. Returns `None` once every bus handle is dropped.
    pub async fn recv(&mut self) -> Option<Envelope> {
        loop {
            match self.rx.recv().await {
                Ok(envelope) => return Some(envelope),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event subscriber lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking receive, used by tests and drain loops.
    pub fn try_recv(&mut self) -> Option<Envelope> {
        loop {
            match self.rx.try_recv() {
                Ok(envelope) => return Some(envelope),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "event subscriber lagged, events dropped");
                }
                Err(_) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account() -> AccountId {
        AccountId::new("acct-1").unwrap()
    }

    fn state(status: SessionStatus) -> DomainEvent {
        DomainEvent::ConnectionState {
            account_id: account(),
            status,
            qr: None,
            reason: None,
        }
    }

    #[tokio::test]
    async fn every_subscriber_sees_every_event() {
        let bus = EventBus::new(16);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        assert_eq!(bus.publish(state(SessionStatus::Connecting)), 2);
        assert_eq!(bus.publish(state(SessionStatus::Connected)), 2);

        for sub in [&mut a, &mut b] {
            let first = sub.recv().await.unwrap();
            let second = sub.recv().await.unwrap();
            assert_eq!(first.event, state(SessionStatus::Connecting));
            assert_eq!(second.event, state(SessionStatus::Connected));
            assert_ne!(first.id, second.id);
        }
    }

    #[test]
    fn publishing_without_subscribers_is_fine() {
        let bus = EventBus::new(4);
        assert_eq!(bus.publish(state(SessionStatus::Connected)), 0);
    }

    #[tokio::test]
    async fn lagging_subscriber_skips_to_newest() {
        let bus = EventBus::new(2);
        let mut sub = bus.subscribe();
        for status in [
            SessionStatus::Connecting,
            SessionStatus::QrPending,
            SessionStatus::Connected,
        ] {
            bus.publish(state(status));
        }
        let got = sub.recv().await.unwrap();
        assert_eq!(got.event, state(SessionStatus::QrPending));
    }

    #[tokio::test]
    async fn recv_ends_when_bus_dropped() {
        let bus = EventBus::new(2);
        let mut sub = bus.subscribe();
        drop(bus);
        assert!(sub.recv().await.is_none());
    }

    #[test]
    fn envelope_serializes_flat() {
        let envelope = Envelope {
            id: Uuid::nil(),
            published_at: Utc::now(),
            event: state(SessionStatus::QrPending),
        };
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["type"], "connectionState");
        assert_eq!(json["status"], "qrPending");
        assert_eq!(json["accountId"], "acct-1");
    }
}
