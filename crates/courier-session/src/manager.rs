// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Connection manager: one transport session per account id.
//!
//! The manager owns the connection pool, each account's observable
//! [`SessionInfo`], reconnect timers and the per-account caches. Every
//! live transport session gets an event pump task that feeds the
//! translator and the bus.
//!
//! Two mechanisms keep a single live handle per account: a per-account
//! async lock serializes connect, restart, disconnect and reconnect, and
//! every pooled connection carries a generation number so a pump that was
//! superseded stops acting on its events.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, join_all};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use courier_bus::{DomainEvent, EventBus};
use courier_config::model::SessionConfig;
use courier_core::backoff::exponential_delay;
use courier_core::traits::transport::{ConnectionState, RawTransportEvent};
use courier_core::types::{
    AccountId, ConnectOutcome, DisconnectReason, GroupMetadata, HistoryRecord, MessageHistory,
    MessagePayload, SentMessage, SessionInfo, SessionStatus,
};
use courier_core::{
    BoundedMap, CourierError, SessionStore, TransportConnector, TransportHandle, TransportSession,
};

use crate::cache::{GroupMetadataCache, MessageCache};
use crate::translator;

/// Accounts restored concurrently at startup.
const RESTORE_CONCURRENCY: usize = 8;

struct PooledConnection {
    generation: u64,
    handle: Arc<dyn TransportHandle>,
    /// Set right after the pump is spawned.
    pump: Option<JoinHandle<()>>,
}

struct ReconnectTimer {
    id: u64,
    task: JoinHandle<()>,
}

/// Connected sessions versus all known sessions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionCounts {
    pub connected: usize,
    pub total: usize,
}

struct ManagerInner {
    settings: SessionConfig,
    connector: Arc<dyn TransportConnector>,
    store: Arc<dyn SessionStore>,
    bus: EventBus,
    pool: Mutex<BoundedMap<AccountId, PooledConnection>>,
    sessions: DashMap<AccountId, Arc<watch::Sender<SessionInfo>>>,
    locks: DashMap<AccountId, Arc<tokio::sync::Mutex<()>>>,
    reconnects: DashMap<AccountId, ReconnectTimer>,
    groups: GroupMetadataCache,
    messages: MessageCache,
    generation: AtomicU64,
    timer_ids: AtomicU64,
    started: AtomicBool,
    cancel: CancellationToken,
    background: Mutex<Vec<JoinHandle<()>>>,
}

/// Pool of transport sessions keyed by account id. Cheap to clone.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("connector", &self.inner.connector.name())
            .field("sessions", &self.inner.sessions.len())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

fn outcome_of(info: &SessionInfo) -> ConnectOutcome {
    match (&info.status, &info.qr) {
        (SessionStatus::QrPending, Some(qr)) => ConnectOutcome::Qr {
            qr_code: qr.clone(),
        },
        _ => ConnectOutcome::Status {
            status: info.status,
        },
    }
}

impl ConnectionManager {
    pub fn new(
        settings: SessionConfig,
        connector: Arc<dyn TransportConnector>,
        store: Arc<dyn SessionStore>,
        bus: EventBus,
    ) -> Self {
        let groups = GroupMetadataCache::new(
            settings.group_cache_size,
            Duration::from_secs(settings.group_cache_ttl_secs),
        );
        let messages = MessageCache::new(settings.message_cache_size);
        let pool = BoundedMap::new(settings.max_accounts);
        Self {
            inner: Arc::new(ManagerInner {
                settings,
                connector,
                store,
                bus,
                pool: Mutex::new(pool),
                sessions: DashMap::new(),
                locks: DashMap::new(),
                reconnects: DashMap::new(),
                groups,
                messages,
                generation: AtomicU64::new(0),
                timer_ids: AtomicU64::new(0),
                started: AtomicBool::new(false),
                cancel: CancellationToken::new(),
                background: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    /// Starts the history autosave loop.
    pub fn start(&self) {
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return;
        }
        let every = Duration::from_secs(self.inner.settings.history_autosave_secs.max(1));
        let manager = self.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        manager.flush_history().await;
                    }
                    _ = manager.inner.cancel.cancelled() => break,
                }
            }
        });
        self.background().push(task);
        info!(
            connector = self.inner.connector.name(),
            max_accounts = self.inner.settings.max_accounts,
            "connection manager started"
        );
    }

    pub fn is_running(&self) -> bool {
        self.inner.started.load(Ordering::Acquire) && !self.inner.cancel.is_cancelled()
    }

    /// Opens (or reuses) the account's transport session.
    ///
    /// Returns the QR challenge when the account needs pairing, otherwise
    /// the status observed once the handshake settled or
    /// `connect_timeout_secs` elapsed.
    pub async fn connect(&self, account: &AccountId) -> Result<ConnectOutcome, CourierError> {
        self.ensure_open()?;
        let lock = self.account_lock(account);
        let _guard = lock.lock().await;

        if let Some(info) = self.status(account) {
            let live = matches!(
                info.status,
                SessionStatus::Connected | SessionStatus::Connecting | SessionStatus::QrPending
            );
            if live && self.is_pooled(account) {
                debug!(account_id = %account, status = %info.status, "connect on live session");
                return Ok(outcome_of(&info));
            }
        }

        self.cancel_reconnect(account);
        let mut rx = self.open_session(account, true).await?;
        let wait = Duration::from_secs(self.inner.settings.connect_timeout_secs);
        let settled = tokio::time::timeout(
            wait,
            rx.wait_for(|info| info.status != SessionStatus::Connecting || info.qr.is_some()),
        )
        .await
        .is_ok();
        if !settled {
            debug!(account_id = %account, "handshake still pending after connect timeout");
        }
        let info = rx.borrow().clone();
        Ok(outcome_of(&info))
    }

    /// Logs the account out remotely and forgets everything about it.
    pub async fn disconnect(&self, account: &AccountId) -> Result<(), CourierError> {
        let lock = self.account_lock(account);
        let _guard = lock.lock().await;

        let known = self.inner.sessions.contains_key(account)
            || self.is_pooled(account)
            || self.inner.store.load(account).await?.is_some();
        if !known {
            return Err(CourierError::AccountNotFound(account.to_string()));
        }

        // Without a session entry no reconnect can be scheduled or run.
        self.cancel_reconnect(account);
        let session = self.inner.sessions.remove(account).map(|(_, tx)| tx);
        if let Some(record) = self.take_pooled(account) {
            if let Some(pump) = record.pump {
                pump.abort();
            }
            let limit = self.close_timeout();
            match tokio::time::timeout(limit, record.handle.logout()).await {
                Ok(Ok(())) => debug!(account_id = %account, "remote logout complete"),
                Ok(Err(e)) => warn!(account_id = %account, error = %e, "remote logout failed"),
                Err(_) => warn!(account_id = %account, "remote logout timed out"),
            }
            if tokio::time::timeout(limit, record.handle.close()).await.is_err() {
                warn!(account_id = %account, "transport close timed out");
            }
        }

        self.inner.store.clear(account).await?;
        self.forget_caches(account);
        if let Some(tx) = session {
            tx.send_modify(|info| {
                info.status = SessionStatus::Disconnected;
                info.qr = None;
                info.reconnect_attempts = 0;
            });
        }
        self.inner.bus.publish(DomainEvent::ConnectionState {
            account_id: account.clone(),
            status: SessionStatus::Disconnected,
            qr: None,
            reason: None,
        });
        info!(account_id = %account, "session disconnected and credentials cleared");
        Ok(())
    }

    /// Closes the transport without logging out, then connects again with
    /// the stored credentials.
    pub async fn restart(&self, account: &AccountId) -> Result<ConnectOutcome, CourierError> {
        self.ensure_open()?;
        {
            let lock = self.account_lock(account);
            let _guard = lock.lock().await;

            let known = self.inner.sessions.contains_key(account)
                || self.inner.store.load(account).await?.is_some();
            if !known {
                return Err(CourierError::AccountNotFound(account.to_string()));
            }
            self.cancel_reconnect(account);
            if let Some(record) = self.take_pooled(account) {
                if let Some(pump) = record.pump {
                    pump.abort();
                }
                if tokio::time::timeout(self.close_timeout(), record.handle.close())
                    .await
                    .is_err()
                {
                    warn!(account_id = %account, "transport close timed out during restart");
                }
            }
            self.update_session(account, None, |info| {
                info.status = SessionStatus::Disconnected;
                info.qr = None;
                info.reconnect_attempts = 0;
            });
            info!(account_id = %account, "restarting session");
        }
        self.connect(account).await
    }

    pub fn get_connection(&self, account: &AccountId) -> Option<Arc<dyn TransportHandle>> {
        self.pool().get(account).map(|record| record.handle.clone())
    }

    pub fn has_connection(&self, account: &AccountId) -> bool {
        self.is_pooled(account)
    }

    pub fn status(&self, account: &AccountId) -> Option<SessionInfo> {
        self.session_tx(account).map(|tx| tx.borrow().clone())
    }

    /// Follows an account's session state.
    pub fn watch(&self, account: &AccountId) -> Option<watch::Receiver<SessionInfo>> {
        self.session_tx(account).map(|tx| tx.subscribe())
    }

    /// Every known session, sorted by account id.
    pub fn list_instances(&self) -> Vec<SessionInfo> {
        let mut infos: Vec<SessionInfo> = self
            .inner
            .sessions
            .iter()
            .map(|entry| entry.value().borrow().clone())
            .collect();
        infos.sort_by(|a, b| a.account_id.cmp(&b.account_id));
        infos
    }

    pub fn connection_counts(&self) -> ConnectionCounts {
        let mut counts = ConnectionCounts::default();
        for entry in self.inner.sessions.iter() {
            counts.total += 1;
            if entry.value().borrow().status == SessionStatus::Connected {
                counts.connected += 1;
            }
        }
        counts
    }

    /// Decides whether a dropped session is reconnected.
    ///
    /// Never after a remote logout, an explicit disconnect or shutdown.
    /// Otherwise counts the attempt and allows it while the count stays
    /// within `max_reconnect_attempts`. A successful open resets the count.
    pub fn should_reconnect(&self, account: &AccountId, reason: &DisconnectReason) -> bool {
        if reason.is_logout() || self.inner.cancel.is_cancelled() {
            return false;
        }
        let Some(tx) = self.session_tx(account) else {
            return false;
        };
        let max = self.inner.settings.max_reconnect_attempts;
        let mut allowed = false;
        tx.send_modify(|info| {
            info.reconnect_attempts = info.reconnect_attempts.saturating_add(1);
            allowed = info.reconnect_attempts <= max;
        });
        allowed
    }

    /// Sends through the account's live handle.
    pub async fn send(
        &self,
        account: &AccountId,
        to: &str,
        payload: &MessagePayload,
    ) -> Result<SentMessage, CourierError> {
        let handle = self
            .live_handle(account)
            .ok_or_else(|| CourierError::NoActiveConnection {
                account_id: account.to_string(),
            })?;
        let sent = handle.send(to, payload).await?;
        self.inner.messages.record(
            account,
            HistoryRecord {
                message_id: sent.message_id.clone(),
                chat_id: to.to_string(),
                from_me: true,
                payload: payload.clone(),
                timestamp: sent.timestamp,
            },
        );
        debug!(
            account_id = %account,
            to,
            message_id = %sent.message_id,
            kind = payload.kind(),
            "message sent"
        );
        Ok(sent)
    }

    /// Group metadata from the cache, fetched through the transport on a miss.
    pub async fn group_metadata(
        &self,
        account: &AccountId,
        group_id: &str,
    ) -> Result<GroupMetadata, CourierError> {
        if let Some(metadata) = self.inner.groups.get(account, group_id) {
            return Ok(metadata);
        }
        let handle =
            self.get_connection(account)
                .ok_or_else(|| CourierError::NoActiveConnection {
                    account_id: account.to_string(),
                })?;
        let metadata = handle.group_metadata(group_id).await?;
        self.inner.groups.put(account, metadata.clone());
        Ok(metadata)
    }

    /// Cached recent messages of an account, oldest first.
    pub fn recent_messages(&self, account: &AccountId) -> Vec<HistoryRecord> {
        self.inner.messages.snapshot(account)
    }

    /// Connects every account with stored credentials. Failures are logged
    /// per account; returns how many connects succeeded.
    pub async fn restore_sessions(&self) -> Result<usize, CourierError> {
        let accounts = self.inner.store.list_accounts().await?;
        let pending: Vec<AccountId> = accounts
            .into_iter()
            .filter(|account| !self.is_pooled(account))
            .collect();
        if pending.is_empty() {
            debug!("no stored sessions to restore");
            return Ok(0);
        }

        let results: Vec<(AccountId, Result<ConnectOutcome, CourierError>)> =
            stream::iter(pending)
                .map(|account| async move {
                    let result = self.connect(&account).await;
                    (account, result)
                })
                .buffer_unordered(RESTORE_CONCURRENCY)
                .collect()
                .await;

        let mut restored = 0;
        for (account, result) in results {
            match result {
                Ok(outcome) => {
                    restored += 1;
                    debug!(account_id = %account, ?outcome, "session restored");
                }
                Err(e) => warn!(account_id = %account, error = %e, "could not restore session"),
            }
        }
        info!(restored, "stored sessions restored");
        Ok(restored)
    }

    /// Writes changed message caches to the session store. Returns how many
    /// accounts were saved.
    pub async fn flush_history(&self) -> usize {
        let mut saved = 0;
        for account in self.inner.messages.dirty_accounts() {
            let Some(records) = self.inner.messages.take_dirty(&account) else {
                continue;
            };
            let history = MessageHistory {
                account_id: account.clone(),
                saved_at: Utc::now(),
                records,
            };
            match self.inner.store.save_history(&history).await {
                Ok(()) => saved += 1,
                Err(e) => {
                    self.inner.messages.mark_dirty(&account);
                    warn!(account_id = %account, error = %e, "saving message history failed");
                }
            }
        }
        if saved > 0 {
            debug!(saved, "message history saved");
        }
        saved
    }

    /// Closes every pooled session, each bounded by `close_timeout_secs`.
    /// Failures are logged, never returned.
    pub async fn close_all_connections(&self) {
        let timers: Vec<AccountId> = self
            .inner
            .reconnects
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for account in &timers {
            self.cancel_reconnect(account);
        }

        let records = self.pool().drain();
        let limit = self.close_timeout();
        let closes = records.into_iter().map(|(account, record)| {
            let manager = self.clone();
            async move {
                if let Some(pump) = record.pump {
                    pump.abort();
                }
                match tokio::time::timeout(limit, record.handle.close()).await {
                    Ok(Ok(())) => debug!(account_id = %account, "transport closed"),
                    Ok(Err(e)) => warn!(account_id = %account, error = %e, "transport close failed"),
                    Err(_) => warn!(account_id = %account, "transport close timed out"),
                }
                manager.update_session(&account, None, |info| {
                    info.status = SessionStatus::Disconnected;
                    info.qr = None;
                });
            }
        });
        let closed = join_all(closes).await.len();
        self.flush_history().await;
        info!(closed, "transport sessions closed");
    }

    /// Stops timers and background tasks and closes every session.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        self.close_all_connections().await;
        let tasks: Vec<JoinHandle<()>> = self.background().drain(..).collect();
        for task in tasks {
            task.abort();
        }
        info!("connection manager stopped");
    }

    fn ensure_open(&self) -> Result<(), CourierError> {
        if self.inner.cancel.is_cancelled() {
            return Err(CourierError::NotInitialized);
        }
        Ok(())
    }

    fn close_timeout(&self) -> Duration {
        Duration::from_secs(self.inner.settings.close_timeout_secs)
    }

    fn pool(&self) -> MutexGuard<'_, BoundedMap<AccountId, PooledConnection>> {
        self.inner.pool.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn background(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.inner
            .background
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn is_pooled(&self, account: &AccountId) -> bool {
        self.pool().contains_key(account)
    }

    fn take_pooled(&self, account: &AccountId) -> Option<PooledConnection> {
        self.pool().remove(account)
    }

    fn is_current(&self, account: &AccountId, generation: u64) -> bool {
        self.pool()
            .get(account)
            .is_some_and(|record| record.generation == generation)
    }

    /// Removes the pooled connection if it still belongs to `generation`.
    fn detach(&self, account: &AccountId, generation: u64) -> bool {
        let mut pool = self.pool();
        if pool
            .get(account)
            .is_some_and(|record| record.generation == generation)
        {
            pool.remove(account);
            return true;
        }
        false
    }

    fn live_handle(&self, account: &AccountId) -> Option<Arc<dyn TransportHandle>> {
        let connected = self
            .status(account)
            .is_some_and(|info| info.status == SessionStatus::Connected);
        if !connected {
            return None;
        }
        self.get_connection(account)
    }

    fn account_lock(&self, account: &AccountId) -> Arc<tokio::sync::Mutex<()>> {
        self.inner
            .locks
            .entry(account.clone())
            .or_default()
            .value()
            .clone()
    }

    fn session_tx(&self, account: &AccountId) -> Option<Arc<watch::Sender<SessionInfo>>> {
        self.inner
            .sessions
            .get(account)
            .map(|entry| entry.value().clone())
    }

    /// Applies `change` to the account's session and publishes the result.
    fn update_session(
        &self,
        account: &AccountId,
        reason: Option<DisconnectReason>,
        change: impl FnOnce(&mut SessionInfo),
    ) -> Option<SessionInfo> {
        let tx = self.session_tx(account)?;
        tx.send_modify(change);
        let info = tx.borrow().clone();
        self.inner.bus.publish(DomainEvent::ConnectionState {
            account_id: account.clone(),
            status: info.status,
            qr: info.qr.clone(),
            reason,
        });
        Some(info)
    }

    fn forget_caches(&self, account: &AccountId) {
        self.inner.messages.forget(account);
        self.inner.groups.forget_account(account);
    }

    fn cancel_reconnect(&self, account: &AccountId) {
        if let Some((_, timer)) = self.inner.reconnects.remove(account) {
            timer.task.abort();
            debug!(account_id = %account, "pending reconnect cancelled");
        }
    }

    async fn restore_history(&self, account: &AccountId) {
        match self.inner.store.load_history(account).await {
            Ok(Some(history)) => {
                let count = history.records.len();
                self.inner.messages.restore(account, history.records);
                debug!(account_id = %account, count, "message history loaded");
            }
            Ok(None) => {}
            Err(e) => warn!(account_id = %account, error = %e, "could not load message history"),
        }
    }

    fn ensure_capacity(&self, account: &AccountId) -> Result<(), CourierError> {
        let pool = self.pool();
        if !pool.contains_key(account) && pool.is_full() {
            return Err(CourierError::CapacityExceeded {
                resource: "connection pool".into(),
                capacity: pool.capacity(),
            });
        }
        Ok(())
    }

    /// Pools a fresh handle, returning the connection it replaced.
    fn pool_insert(
        &self,
        account: &AccountId,
        generation: u64,
        handle: Arc<dyn TransportHandle>,
    ) -> Result<Option<PooledConnection>, CourierError> {
        let mut pool = self.pool();
        let record = PooledConnection {
            generation,
            handle,
            pump: None,
        };
        pool.try_insert(account.clone(), record)
            .map_err(|_| CourierError::CapacityExceeded {
                resource: "connection pool".into(),
                capacity: pool.capacity(),
            })
    }

    fn attach_pump(&self, account: &AccountId, generation: u64, pump: JoinHandle<()>) {
        let mut pool = self.pool();
        match pool.get_mut(account) {
            Some(record) if record.generation == generation => record.pump = Some(pump),
            _ => pump.abort(),
        }
    }

    fn retire(&self, previous: PooledConnection) {
        if let Some(pump) = previous.pump {
            pump.abort();
        }
        let limit = self.close_timeout();
        let handle = previous.handle;
        tokio::spawn(async move {
            let _ = tokio::time::timeout(limit, handle.close()).await;
        });
    }

    /// Opens a transport session and pools it. The caller holds the
    /// account lock.
    async fn open_session(
        &self,
        account: &AccountId,
        reset_attempts: bool,
    ) -> Result<watch::Receiver<SessionInfo>, CourierError> {
        self.ensure_capacity(account)?;
        let credentials = self.inner.store.load(account).await?;
        let restored = credentials.is_some();

        let first_open = !self.inner.sessions.contains_key(account);
        let tx = self
            .inner
            .sessions
            .entry(account.clone())
            .or_insert_with(|| Arc::new(watch::channel(SessionInfo::new(account.clone())).0))
            .value()
            .clone();
        let rx = tx.subscribe();
        self.update_session(account, None, |info| {
            info.status = SessionStatus::Connecting;
            info.qr = None;
            if reset_attempts {
                info.reconnect_attempts = 0;
            }
        });
        if !self.inner.messages.contains_account(account) {
            self.restore_history(account).await;
        }

        let TransportSession { handle, events } =
            match self.inner.connector.open(account, credentials).await {
                Ok(session) => session,
                Err(e) => {
                    warn!(account_id = %account, error = %e, "transport open failed");
                    self.abandon_open(account, first_open);
                    return Err(e);
                }
            };

        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let previous = match self.pool_insert(account, generation, handle.clone()) {
            Ok(previous) => previous,
            Err(e) => {
                let _ = tokio::time::timeout(self.close_timeout(), handle.close()).await;
                self.abandon_open(account, first_open);
                return Err(e);
            }
        };
        if let Some(previous) = previous {
            debug!(account_id = %account, generation = previous.generation, "retiring superseded transport session");
            self.retire(previous);
        }

        let pump = tokio::spawn(self.clone().run_pump(account.clone(), generation, events));
        self.attach_pump(account, generation, pump);
        info!(account_id = %account, generation, restored, "transport session opened");
        Ok(rx)
    }

    fn abandon_open(&self, account: &AccountId, first_open: bool) {
        self.update_session(account, None, |info| {
            info.status = SessionStatus::Disconnected;
            info.qr = None;
        });
        if first_open {
            self.inner.sessions.remove(account);
        }
    }

    async fn run_pump(
        self,
        account: AccountId,
        generation: u64,
        mut events: mpsc::Receiver<RawTransportEvent>,
    ) {
        while let Some(event) = events.recv().await {
            if !self.is_current(&account, generation) {
                debug!(account_id = %account, generation, "dropping events of superseded transport session");
                return;
            }
            if !self.handle_event(&account, generation, event).await {
                return;
            }
        }
        if self.is_current(&account, generation) {
            self.handle_close(&account, generation, DisconnectReason::ConnectionLost)
                .await;
        }
    }

    /// Handles one transport event. Returns false once the session closed.
    async fn handle_event(
        &self,
        account: &AccountId,
        generation: u64,
        event: RawTransportEvent,
    ) -> bool {
        match event {
            RawTransportEvent::ConnectionUpdate { state, qr } => {
                if let Some(qr) = qr {
                    info!(account_id = %account, "QR challenge available");
                    self.update_session(account, None, |info| {
                        info.status = SessionStatus::QrPending;
                        info.qr = Some(qr);
                    });
                }
                match state {
                    ConnectionState::Connecting => {}
                    ConnectionState::Open => {
                        self.update_session(account, None, |info| {
                            info.status = SessionStatus::Connected;
                            info.qr = None;
                            info.reconnect_attempts = 0;
                            info.last_connected_at = Some(Utc::now());
                        });
                        info!(account_id = %account, generation, "session connected");
                    }
                    ConnectionState::Close { reason } => {
                        self.handle_close(account, generation, reason).await;
                        return false;
                    }
                }
            }
            RawTransportEvent::CredsUpdate { credentials } => {
                if let Err(e) = self.inner.store.save(account, &credentials).await {
                    warn!(account_id = %account, error = %e, "persisting credentials failed");
                }
            }
            RawTransportEvent::MessagesUpsert { messages } => {
                for raw in &messages {
                    if let Some(record) = translator::history_record(raw) {
                        self.inner.messages.record(account, record);
                    }
                    if let Some(message) = translator::translate_message(account, raw) {
                        self.inner
                            .bus
                            .publish(DomainEvent::MessageReceived { message });
                    }
                }
            }
            RawTransportEvent::MessagesUpdate { updates } => {
                for update in &updates {
                    self.inner
                        .bus
                        .publish(translator::status_event(account, update));
                }
            }
            RawTransportEvent::MessagesDelete {
                chat_id,
                message_ids,
            } => {
                self.inner.messages.remove(account, &message_ids);
                self.inner
                    .bus
                    .publish(translator::deletion_event(account, &chat_id, &message_ids));
            }
            RawTransportEvent::GroupsUpdate { groups } => {
                for metadata in groups {
                    self.inner.groups.put(account, metadata);
                }
            }
            RawTransportEvent::GroupParticipantsUpdate {
                group_id,
                participants,
                action,
            } => {
                debug!(
                    account_id = %account,
                    group_id = %group_id,
                    action = %action,
                    participants = participants.len(),
                    "group membership changed"
                );
                self.inner.groups.invalidate(account, &group_id);
                self.refresh_group(account, group_id);
            }
        }
        true
    }

    /// Re-fetches group metadata off the event path.
    fn refresh_group(&self, account: &AccountId, group_id: String) {
        let Some(handle) = self.get_connection(account) else {
            return;
        };
        let manager = self.clone();
        let account = account.clone();
        tokio::spawn(async move {
            match handle.group_metadata(&group_id).await {
                Ok(metadata) => manager.inner.groups.put(&account, metadata),
                Err(e) => debug!(account_id = %account, group_id = %group_id, error = %e, "group refresh failed"),
            }
        });
    }

    async fn handle_close(&self, account: &AccountId, generation: u64, reason: DisconnectReason) {
        if !self.detach(account, generation) {
            return;
        }
        if reason.is_logout() {
            warn!(account_id = %account, "logged out remotely, clearing credentials");
            if let Err(e) = self.inner.store.clear(account).await {
                warn!(account_id = %account, error = %e, "clearing credentials failed");
            }
            self.forget_caches(account);
            self.update_session(account, Some(reason), |info| {
                info.status = SessionStatus::Disconnected;
                info.qr = None;
                info.reconnect_attempts = 0;
            });
            return;
        }
        self.retry_or_give_up(account, reason);
    }

    fn retry_or_give_up(&self, account: &AccountId, reason: DisconnectReason) {
        if self.should_reconnect(account, &reason) {
            let attempt = self.status(account).map_or(1, |info| info.reconnect_attempts);
            let delay = self.schedule_reconnect(account, attempt);
            self.update_session(account, Some(reason.clone()), |info| {
                info.status = SessionStatus::Connecting;
                info.qr = None;
            });
            warn!(
                account_id = %account,
                reason = %reason,
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "transport dropped, reconnect scheduled"
            );
        } else if let Some(info) = self.update_session(account, Some(reason.clone()), |info| {
            info.status = SessionStatus::Disconnected;
            info.qr = None;
        }) {
            warn!(
                account_id = %account,
                reason = %reason,
                attempts = info.reconnect_attempts,
                "transport dropped, not reconnecting"
            );
        }
    }

    fn schedule_reconnect(&self, account: &AccountId, attempt: u32) -> Duration {
        let settings = &self.inner.settings;
        let delay = exponential_delay(
            Duration::from_millis(settings.reconnect_delay_ms),
            attempt,
            Some(Duration::from_millis(settings.max_reconnect_delay_ms)),
        );
        let id = self.inner.timer_ids.fetch_add(1, Ordering::Relaxed);
        let manager = self.clone();
        let target = account.clone();
        // The timer may only clear its own map entry once that entry exists.
        let (armed_tx, armed_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let _ = armed_rx.await;
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = manager.inner.cancel.cancelled() => return,
            }
            manager
                .inner
                .reconnects
                .remove_if(&target, |_, timer| timer.id == id);
            manager.reconnect(target).await;
        });
        if let Some(previous) = self
            .inner
            .reconnects
            .insert(account.clone(), ReconnectTimer { id, task })
        {
            previous.task.abort();
        }
        let _ = armed_tx.send(());
        delay
    }

    fn reconnect(&self, account: AccountId) -> BoxFuture<'static, ()> {
        let manager = self.clone();
        async move {
            let lock = manager.account_lock(&account);
            let _guard = lock.lock().await;
            if manager.inner.cancel.is_cancelled()
                || manager.session_tx(&account).is_none()
                || manager.is_pooled(&account)
            {
                debug!(account_id = %account, "reconnect no longer needed");
                return;
            }
            info!(account_id = %account, "reconnecting");
            if let Err(e) = manager.open_session(&account, false).await {
                warn!(account_id = %account, error = %e, "reconnect attempt failed");
                manager.retry_or_give_up(&account, DisconnectReason::ConnectionLost);
            }
        }
        .boxed()
    }
}
