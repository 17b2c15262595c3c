// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Scripted in-memory transport for deterministic testing.
//!
//! `MockConnector` implements `TransportConnector`. Each `open` creates a
//! `MockHandle` whose event channel tests drive directly: show a QR code,
//! open the session, drop it with a reason, deliver messages. Sends are
//! captured for assertions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;

use courier_core::traits::transport::{
    ConnectionState, RawContent, RawMessage, RawTransportEvent,
};
use courier_core::types::{
    AccountId, Credentials, DeliveryStatus, DisconnectReason, GroupMetadata, MessagePayload,
    SentMessage,
};
use courier_core::{CourierError, TransportConnector, TransportHandle, TransportSession};

/// What a freshly opened mock session does on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenBehavior {
    /// Emits a credentials update and an open event.
    AutoOpen,
    /// Without stored credentials emits this QR challenge; with them, opens.
    Qr(String),
    /// Emits nothing until the test drives it.
    Silent,
    /// `open` itself fails.
    Fail,
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One mock transport session.
pub struct MockHandle {
    account: AccountId,
    events: Mutex<Option<mpsc::Sender<RawTransportEvent>>>,
    sent: Mutex<Vec<(String, MessagePayload)>>,
    groups: Mutex<HashMap<String, GroupMetadata>>,
    credentials: Option<Credentials>,
    fail_sends: AtomicBool,
    send_delay_ms: AtomicU64,
    closed: AtomicBool,
    logged_out: AtomicBool,
    group_fetches: AtomicUsize,
    next_id: AtomicUsize,
}

impl MockHandle {
    fn new(account: AccountId, tx: mpsc::Sender<RawTransportEvent>, credentials: Option<Credentials>) -> Self {
        Self {
            account,
            events: Mutex::new(Some(tx)),
            sent: Mutex::new(Vec::new()),
            groups: Mutex::new(HashMap::new()),
            credentials,
            fail_sends: AtomicBool::new(false),
            send_delay_ms: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            logged_out: AtomicBool::new(false),
            group_fetches: AtomicUsize::new(0),
            next_id: AtomicUsize::new(1),
        }
    }

    pub fn account(&self) -> &AccountId {
        &self.account
    }

    /// Credentials the session was opened with.
    pub fn opened_with(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// Pushes a raw event to the manager. Returns false if nobody listens.
    pub async fn emit(&self, event: RawTransportEvent) -> bool {
        let tx = lock(&self.events).clone();
        match tx {
            Some(tx) => tx.send(event).await.is_ok(),
            None => false,
        }
    }

    pub async fn show_qr(&self, qr: &str) -> bool {
        self.emit(RawTransportEvent::ConnectionUpdate {
            state: ConnectionState::Connecting,
            qr: Some(qr.to_string()),
        })
        .await
    }

    /// Completes pairing: stores credentials, then opens.
    pub async fn open(&self) -> bool {
        let creds = Credentials(serde_json::json!({ "me": self.account.as_str() }));
        self.emit(RawTransportEvent::CredsUpdate { credentials: creds })
            .await
            && self
                .emit(RawTransportEvent::ConnectionUpdate {
                    state: ConnectionState::Open,
                    qr: None,
                })
                .await
    }

    pub async fn drop_connection(&self, reason: DisconnectReason) -> bool {
        self.emit(RawTransportEvent::ConnectionUpdate {
            state: ConnectionState::Close { reason },
            qr: None,
        })
        .await
    }

    /// Ends the event stream without a close event.
    pub fn hang_up(&self) {
        lock(&self.events).take();
    }

    pub async fn receive_text(&self, chat_id: &str, id: &str, text: &str) -> bool {
        self.emit(RawTransportEvent::MessagesUpsert {
            messages: vec![RawMessage {
                id: id.to_string(),
                chat_id: chat_id.to_string(),
                participant: None,
                from_me: false,
                push_name: Some("Tester".into()),
                timestamp: Utc::now().timestamp(),
                content: RawContent::Text {
                    text: text.to_string(),
                },
            }],
        })
        .await
    }

    pub fn sent(&self) -> Vec<(String, MessagePayload)> {
        lock(&self.sent).clone()
    }

    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Holds every subsequent send for `delay` before it completes.
    pub fn set_send_delay(&self, delay: Duration) {
        self.send_delay_ms
            .store(u64::try_from(delay.as_millis()).unwrap_or(u64::MAX), Ordering::SeqCst);
    }

    pub fn set_group(&self, metadata: GroupMetadata) {
        lock(&self.groups).insert(metadata.id.clone(), metadata);
    }

    pub fn group_fetches(&self) -> usize {
        self.group_fetches.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn is_logged_out(&self) -> bool {
        self.logged_out.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransportHandle for MockHandle {
    async fn send(&self, to: &str, payload: &MessagePayload) -> Result<SentMessage, CourierError> {
        if self.is_closed() {
            return Err(CourierError::transport("mock session is closed"));
        }
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(CourierError::transport("mock send failure"));
        }
        let delay = self.send_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        lock(&self.sent).push((to.to_string(), payload.clone()));
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(SentMessage {
            message_id: format!("MOCK{n:04}"),
            status: DeliveryStatus::ServerAck,
            timestamp: Utc::now(),
        })
    }

    async fn group_metadata(&self, group_id: &str) -> Result<GroupMetadata, CourierError> {
        self.group_fetches.fetch_add(1, Ordering::SeqCst);
        lock(&self.groups)
            .get(group_id)
            .cloned()
            .ok_or_else(|| CourierError::transport(format!("unknown group {group_id}")))
    }

    async fn logout(&self) -> Result<(), CourierError> {
        self.logged_out.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<(), CourierError> {
        self.closed.store(true, Ordering::SeqCst);
        self.hang_up();
        Ok(())
    }
}

/// A `TransportConnector` producing [`MockHandle`]s.
pub struct MockConnector {
    behavior: Mutex<OpenBehavior>,
    handles: Mutex<HashMap<AccountId, Vec<Arc<MockHandle>>>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::with_behavior(OpenBehavior::AutoOpen)
    }

    pub fn with_behavior(behavior: OpenBehavior) -> Self {
        Self {
            behavior: Mutex::new(behavior),
            handles: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_behavior(&self, behavior: OpenBehavior) {
        *lock(&self.behavior) = behavior;
    }

    /// Most recently opened handle of an account.
    pub fn handle(&self, account: &AccountId) -> Option<Arc<MockHandle>> {
        lock(&self.handles)
            .get(account)
            .and_then(|handles| handles.last().cloned())
    }

    pub fn open_count(&self, account: &AccountId) -> usize {
        lock(&self.handles).get(account).map_or(0, Vec::len)
    }

    /// Handles of an account that were opened and not closed yet.
    pub fn live_handles(&self, account: &AccountId) -> usize {
        lock(&self.handles)
            .get(account)
            .map_or(0, |handles| handles.iter().filter(|h| !h.is_closed()).count())
    }
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransportConnector for MockConnector {
    fn name(&self) -> &str {
        "mock"
    }

    async fn open(
        &self,
        account: &AccountId,
        credentials: Option<Credentials>,
    ) -> Result<TransportSession, CourierError> {
        let behavior = lock(&self.behavior).clone();
        if behavior == OpenBehavior::Fail {
            return Err(CourierError::transport("mock connector refused to open"));
        }

        let (tx, rx) = mpsc::channel(64);
        let paired = credentials.is_some();
        let handle = Arc::new(MockHandle::new(account.clone(), tx, credentials));
        lock(&self.handles)
            .entry(account.clone())
            .or_default()
            .push(handle.clone());

        match behavior {
            OpenBehavior::AutoOpen => {
                handle.open().await;
            }
            OpenBehavior::Qr(code) if !paired => {
                handle.show_qr(&code).await;
            }
            OpenBehavior::Qr(_) => {
                handle.open().await;
            }
            OpenBehavior::Silent | OpenBehavior::Fail => {}
        }

        Ok(TransportSession {
            handle,
            events: rx,
        })
    }
}
