// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Orchestrator facade for the Courier session gateway.
//!
//! [`Courier`] owns the connection manager, both message queues and the
//! health service. It is constructed with explicit dependencies, brought up
//! by [`Courier::initialize`] and torn down by [`Courier::dispose`]; every
//! operation in between fails with [`CourierError::NotInitialized`] while no
//! runtime is installed.

mod handlers;

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use courier_bus::{DomainEvent, EventBus, EventSubscriber};
use courier_config::model::CourierConfig;
use courier_core::types::{
    AccountId, Button, ConnectOutcome, Direction, HealthStatus, MessagePayload, QueueMessageData,
    SentMessage, SessionInfo, normalize_recipient,
};
use courier_core::{CourierError, SessionStore, TransportConnector};
use courier_health::{ConnectionProbe, HealthProbe, HealthService, QueueProbe, StorageProbe};
use courier_queue::{EnqueueOptions, MessageQueue, QueueStats};
use courier_session::ConnectionManager;
use courier_storage::Database;

pub use handlers::{InboundHandler, LoggingInboundHandler};

use handlers::{InboundJobHandler, OutboundJobHandler, inbound_job};

/// External collaborators handed to [`Courier::new`].
#[derive(Clone)]
pub struct CourierDeps {
    pub store: Arc<dyn SessionStore>,
    pub connector: Arc<dyn TransportConnector>,
    pub database: Arc<Database>,
}

/// Media message body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaContent {
    pub url: String,
    pub mimetype: String,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
}

/// Interactive buttons message body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ButtonsContent {
    pub text: String,
    #[serde(default)]
    pub footer: Option<String>,
    pub buttons: Vec<Button>,
}

/// Counts of both queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueOverview {
    pub inbound: QueueStats,
    pub outbound: QueueStats,
}

/// Everything that exists only between `initialize` and `dispose`.
struct Runtime {
    bus: EventBus,
    manager: ConnectionManager,
    queue: MessageQueue,
    health: HealthService,
    cancel: CancellationToken,
    inbound_pump: JoinHandle<()>,
}

/// The gateway facade.
pub struct Courier {
    config: CourierConfig,
    deps: CourierDeps,
    inbound: Mutex<Arc<dyn InboundHandler>>,
    runtime: ArcSwapOption<Runtime>,
    lifecycle: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for Courier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Courier")
            .field("connector", &self.deps.connector.name())
            .field("initialized", &self.is_initialized())
            .finish_non_exhaustive()
    }
}

fn directions(direction: Option<Direction>) -> Vec<Direction> {
    direction.map_or_else(|| Direction::ALL.to_vec(), |d| vec![d])
}

impl Courier {
    pub fn new(config: CourierConfig, deps: CourierDeps) -> Self {
        Self {
            config,
            deps,
            inbound: Mutex::new(Arc::new(LoggingInboundHandler)),
            runtime: ArcSwapOption::empty(),
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    pub fn config(&self) -> &CourierConfig {
        &self.config
    }

    pub fn is_initialized(&self) -> bool {
        self.runtime.load().is_some()
    }

    /// Replaces the inbound message handler. Only allowed before `initialize`.
    pub fn set_inbound_handler(&self, handler: Arc<dyn InboundHandler>) -> Result<(), CourierError> {
        if self.is_initialized() {
            return Err(CourierError::InvalidInput(
                "the inbound handler must be set before initialize".into(),
            ));
        }
        *self.inbound.lock().unwrap_or_else(PoisonError::into_inner) = handler;
        Ok(())
    }

    /// Brings every subsystem up. Calling it again while initialized is a no-op.
    ///
    /// An unreachable job store is fatal. Session restore failures are
    /// logged per account and do not fail initialization.
    pub async fn initialize(&self) -> Result<(), CourierError> {
        let _lifecycle = self.lifecycle.lock().await;
        if self.is_initialized() {
            return Ok(());
        }
        info!(connector = self.deps.connector.name(), "initializing courier");

        let rtt = self.deps.database.ping().await.map_err(|e| {
            error!(error = %e, "job store unreachable");
            e
        })?;
        debug!(rtt_ms = u64::try_from(rtt.as_millis()).unwrap_or(u64::MAX), "job store reachable");

        let bus = EventBus::new(self.config.sessions.event_bus_capacity);
        let manager = ConnectionManager::new(
            self.config.sessions.clone(),
            self.deps.connector.clone(),
            self.deps.store.clone(),
            bus.clone(),
        );
        let queue = MessageQueue::new(self.deps.database.clone(), &self.config.queue);
        let inbound = self
            .inbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        queue.register_handler(
            Direction::Inbound,
            Arc::new(InboundJobHandler { handler: inbound }),
        )?;
        queue.register_handler(
            Direction::Outbound,
            Arc::new(OutboundJobHandler {
                manager: manager.clone(),
            }),
        )?;

        // Recovered sends wait for restored sessions instead of failing on
        // an empty pool.
        let restore = self.config.sessions.restore_on_start;
        if restore {
            queue.hold(Direction::Outbound);
        }
        // Stale active jobs go back to waiting before any dispatcher runs.
        let recovered = queue.start().await?;
        manager.start();

        let cancel = CancellationToken::new();
        let inbound_pump = tokio::spawn(pump_inbound(
            bus.subscribe(),
            queue.clone(),
            cancel.clone(),
        ));

        let probes: Vec<Arc<dyn HealthProbe>> = vec![
            Arc::new(ConnectionProbe::new(manager.clone(), &self.config.health)),
            Arc::new(QueueProbe::new(queue.clone(), &self.config.health)),
            Arc::new(StorageProbe::new(self.deps.database.clone())),
        ];
        let health = HealthService::new(self.config.health.clone(), probes);

        let runtime = Arc::new(Runtime {
            bus,
            manager: manager.clone(),
            queue: queue.clone(),
            health: health.clone(),
            cancel,
            inbound_pump,
        });
        self.runtime.store(Some(runtime));

        if restore {
            match manager.restore_sessions().await {
                Ok(restored) => debug!(restored, "session restore finished"),
                Err(e) => warn!(error = %e, "listing stored sessions failed"),
            }
            queue.release(Direction::Outbound);
        }
        if self.config.health.enabled {
            health.start();
        }
        info!(recovered_jobs = recovered, "courier initialized");
        Ok(())
    }

    /// Stops health checks, drains the queues, closes every session and
    /// flushes history. Safe to call more than once.
    pub async fn dispose(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        let Some(runtime) = self.runtime.swap(None) else {
            return;
        };
        info!("disposing courier");
        runtime.health.shutdown().await;
        runtime.cancel.cancel();
        runtime.inbound_pump.abort();
        runtime
            .queue
            .shutdown(Duration::from_secs(self.config.queue.shutdown_grace_secs))
            .await;
        runtime.manager.shutdown().await;
        if let Err(e) = self.deps.database.close().await {
            warn!(error = %e, "closing job store failed");
        }
        info!("courier disposed");
    }

    fn runtime(&self) -> Result<Arc<Runtime>, CourierError> {
        self.runtime.load_full().ok_or(CourierError::NotInitialized)
    }

    /// Subscribes to domain events.
    pub fn subscribe(&self) -> Result<EventSubscriber, CourierError> {
        Ok(self.runtime()?.bus.subscribe())
    }

    pub async fn connect(&self, account: &AccountId) -> Result<ConnectOutcome, CourierError> {
        self.runtime()?.manager.connect(account).await
    }

    pub async fn disconnect(&self, account: &AccountId) -> Result<(), CourierError> {
        self.runtime()?.manager.disconnect(account).await
    }

    pub async fn restart(&self, account: &AccountId) -> Result<ConnectOutcome, CourierError> {
        self.runtime()?.manager.restart(account).await
    }

    pub fn status(&self, account: &AccountId) -> Result<SessionInfo, CourierError> {
        self.runtime()?
            .manager
            .status(account)
            .ok_or_else(|| CourierError::AccountNotFound(account.to_string()))
    }

    pub fn list_instances(&self) -> Result<Vec<SessionInfo>, CourierError> {
        Ok(self.runtime()?.manager.list_instances())
    }

    pub async fn send_text(
        &self,
        account: &AccountId,
        to: &str,
        text: impl Into<String>,
    ) -> Result<SentMessage, CourierError> {
        self.send_payload(account, to, MessagePayload::Text { text: text.into() })
            .await
    }

    pub async fn send_media(
        &self,
        account: &AccountId,
        to: &str,
        media: MediaContent,
    ) -> Result<SentMessage, CourierError> {
        let payload = MessagePayload::Media {
            url: media.url,
            mimetype: media.mimetype,
            caption: media.caption,
            file_name: media.file_name,
        };
        self.send_payload(account, to, payload).await
    }

    pub async fn send_buttons(
        &self,
        account: &AccountId,
        to: &str,
        content: ButtonsContent,
    ) -> Result<SentMessage, CourierError> {
        let payload = MessagePayload::Buttons {
            text: content.text,
            footer: content.footer,
            buttons: content.buttons,
        };
        self.send_payload(account, to, payload).await
    }

    /// Enqueues an outbound message and waits up to `send.timeout_secs`
    /// for its delivery. A timeout leaves the job queued.
    async fn send_payload(
        &self,
        account: &AccountId,
        to: &str,
        payload: MessagePayload,
    ) -> Result<SentMessage, CourierError> {
        let runtime = self.runtime()?;
        payload.validate()?;
        let chat_id = normalize_recipient(to)?;
        let data = QueueMessageData::outbound(account.clone(), chat_id, payload);
        let job = runtime
            .queue
            .enqueue(Direction::Outbound, data, EnqueueOptions::default())
            .await?;
        let wait = Duration::from_secs(self.config.send.timeout_secs);
        let value = job.wait(wait).await.map_err(|e| {
            if matches!(e, CourierError::Timeout { .. }) {
                warn!(job_id = job.id(), account_id = %account, "send still pending after timeout");
            }
            e
        })?;
        Ok(serde_json::from_value(value)?)
    }

    /// Queues a text message for delivery at `send_at`. Returns the job id.
    pub async fn schedule_message(
        &self,
        account: &AccountId,
        to: &str,
        text: impl Into<String>,
        send_at: DateTime<Utc>,
    ) -> Result<i64, CourierError> {
        let runtime = self.runtime()?;
        let delay = (send_at - Utc::now())
            .to_std()
            .ok()
            .filter(|d| !d.is_zero())
            .ok_or_else(|| CourierError::InvalidInput("sendAt must be in the future".into()))?;
        let payload = MessagePayload::Text { text: text.into() };
        payload.validate()?;
        let chat_id = normalize_recipient(to)?;
        let data = QueueMessageData::outbound(account.clone(), chat_id, payload);
        let job = runtime
            .queue
            .enqueue(
                Direction::Outbound,
                data,
                EnqueueOptions {
                    delay: Some(delay),
                    ..EnqueueOptions::default()
                },
            )
            .await?;
        info!(
            job_id = job.id(),
            account_id = %account,
            send_at = %send_at.to_rfc3339(),
            "message scheduled"
        );
        Ok(job.id())
    }

    /// Runs a probe round and returns the composite report.
    pub async fn health(&self) -> Result<HealthStatus, CourierError> {
        Ok(self.runtime()?.health.check_now().await)
    }

    pub async fn attempt_recovery(&self) -> Result<Vec<String>, CourierError> {
        Ok(self.runtime()?.health.attempt_recovery().await)
    }

    /// Pauses one queue, or both when `direction` is `None`.
    pub fn pause_queue(&self, direction: Option<Direction>) -> Result<(), CourierError> {
        let runtime = self.runtime()?;
        for d in directions(direction) {
            runtime.queue.pause(d);
        }
        Ok(())
    }

    pub fn resume_queue(&self, direction: Option<Direction>) -> Result<(), CourierError> {
        let runtime = self.runtime()?;
        for d in directions(direction) {
            runtime.queue.resume(d);
        }
        Ok(())
    }

    /// Moves failed jobs back to ready. Returns how many moved.
    pub async fn retry_failed(&self, direction: Option<Direction>) -> Result<usize, CourierError> {
        let runtime = self.runtime()?;
        let mut moved = 0;
        for d in directions(direction) {
            moved += runtime.queue.retry_failed(d).await?;
        }
        Ok(moved)
    }

    pub async fn queue_stats(&self) -> Result<QueueOverview, CourierError> {
        let runtime = self.runtime()?;
        Ok(QueueOverview {
            inbound: runtime.queue.stats(Direction::Inbound).await?,
            outbound: runtime.queue.stats(Direction::Outbound).await?,
        })
    }
}

/// Moves received messages from the bus onto the inbound queue.
async fn pump_inbound(mut events: EventSubscriber, queue: MessageQueue, cancel: CancellationToken) {
    loop {
        let envelope = tokio::select! {
            envelope = events.recv() => envelope,
            _ = cancel.cancelled() => break,
        };
        let Some(envelope) = envelope else {
            break;
        };
        let DomainEvent::MessageReceived { message } = envelope.event else {
            continue;
        };
        let data = match inbound_job(&message) {
            Ok(data) => data,
            Err(e) => {
                warn!(message_id = %message.id, error = %e, "inbound message not queued");
                continue;
            }
        };
        if let Err(e) = queue
            .enqueue(Direction::Inbound, data, EnqueueOptions::default())
            .await
        {
            warn!(
                account_id = %message.account_id,
                message_id = %message.id,
                error = %e,
                "inbound message not queued"
            );
        }
    }
    debug!("inbound pump stopped");
}
