// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test harness for end-to-end integration testing.
//!
//! `TestHarness` assembles an initialized [`Courier`] over the mock
//! transport, an in-memory session store and a temp SQLite job store, with
//! timings shrunk so retries and reconnects finish in milliseconds.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use courier_config::model::{
    CourierConfig, HealthConfig, QueueConfig, QueueSettings, RateLimitConfig, SendConfig,
    SessionConfig, StorageConfig,
};
use courier_core::CourierError;
use courier_core::types::{AccountId, SessionStatus};
use courier_service::{Courier, CourierDeps, InboundHandler};
use courier_storage::Database;

use crate::memory_store::MemorySessionStore;
use crate::mock_transport::{MockConnector, OpenBehavior};

fn fast_lane() -> QueueSettings {
    QueueSettings {
        concurrency: 2,
        rate_limit: RateLimitConfig {
            max: 1000,
            window_ms: 1000,
        },
        attempts: 3,
        backoff_ms: 10,
    }
}

/// Configuration with millisecond-scale timings rooted in `dir`.
///
/// The periodic health loop is off; tests call `health()` directly.
pub fn fast_config(dir: &Path) -> CourierConfig {
    CourierConfig {
        storage: StorageConfig {
            database_path: dir.join("courier.db").to_string_lossy().into_owned(),
            ..StorageConfig::default()
        },
        sessions: SessionConfig {
            auth_dir: dir.join("sessions").to_string_lossy().into_owned(),
            connect_timeout_secs: 2,
            max_reconnect_attempts: 3,
            reconnect_delay_ms: 10,
            max_reconnect_delay_ms: 50,
            close_timeout_secs: 1,
            restore_on_start: false,
            ..SessionConfig::default()
        },
        queue: QueueConfig {
            inbound: fast_lane(),
            outbound: fast_lane(),
            poll_interval_ms: 20,
            shutdown_grace_secs: 1,
            ..QueueConfig::default()
        },
        health: HealthConfig {
            enabled: false,
            ..HealthConfig::default()
        },
        send: SendConfig { timeout_secs: 5 },
        ..CourierConfig::default()
    }
}

/// Builder for creating test environments with configurable options.
pub struct TestHarnessBuilder {
    behavior: OpenBehavior,
    store: MemorySessionStore,
    inbound: Option<Arc<dyn InboundHandler>>,
    configure: Option<Box<dyn FnOnce(&mut CourierConfig) + Send>>,
}

impl TestHarnessBuilder {
    fn new() -> Self {
        Self {
            behavior: OpenBehavior::AutoOpen,
            store: MemorySessionStore::new(),
            inbound: None,
            configure: None,
        }
    }

    /// What freshly opened mock sessions do.
    pub fn with_behavior(mut self, behavior: OpenBehavior) -> Self {
        self.behavior = behavior;
        self
    }

    /// Seeds stored credentials for an account.
    pub fn with_stored_account(mut self, account: &AccountId) -> Self {
        self.store = self.store.with_account(account);
        self
    }

    pub fn with_inbound_handler(mut self, handler: Arc<dyn InboundHandler>) -> Self {
        self.inbound = Some(handler);
        self
    }

    /// Adjusts the fast configuration before the service is built.
    pub fn with_config(mut self, f: impl FnOnce(&mut CourierConfig) + Send + 'static) -> Self {
        self.configure = Some(Box::new(f));
        self
    }

    /// Builds and initializes the service.
    pub async fn build(self) -> Result<TestHarness, CourierError> {
        let temp_dir = tempfile::TempDir::new().map_err(CourierError::storage)?;
        let mut config = fast_config(temp_dir.path());
        if let Some(configure) = self.configure {
            configure(&mut config);
        }

        let database = Arc::new(Database::open(&config.storage).await?);
        let connector = Arc::new(MockConnector::with_behavior(self.behavior));
        let store = Arc::new(self.store);
        let courier = Arc::new(Courier::new(
            config.clone(),
            CourierDeps {
                store: store.clone(),
                connector: connector.clone(),
                database: database.clone(),
            },
        ));
        if let Some(handler) = self.inbound {
            courier.set_inbound_handler(handler)?;
        }
        courier.initialize().await?;

        Ok(TestHarness {
            courier,
            connector,
            store,
            database,
            config,
            _temp_dir: temp_dir,
        })
    }
}

/// A complete test environment with mock adapters and temp storage.
pub struct TestHarness {
    /// The initialized service under test.
    pub courier: Arc<Courier>,
    /// Scripted transport; use it to drive sessions.
    pub connector: Arc<MockConnector>,
    pub store: Arc<MemorySessionStore>,
    /// Job store (temp file, cleaned up on drop).
    pub database: Arc<Database>,
    pub config: CourierConfig,
    _temp_dir: tempfile::TempDir,
}

impl TestHarness {
    /// Create a new builder for configuring the test harness.
    pub fn builder() -> TestHarnessBuilder {
        TestHarnessBuilder::new()
    }

    /// Connects an account and waits until its session is open.
    pub async fn connect(&self, id: &str) -> Result<AccountId, CourierError> {
        let account = AccountId::new(id)?;
        self.courier.connect(&account).await?;
        self.wait_for_status(&account, SessionStatus::Connected, Duration::from_secs(2))
            .await?;
        Ok(account)
    }

    /// Polls the session status until it matches or `limit` passes.
    pub async fn wait_for_status(
        &self,
        account: &AccountId,
        status: SessionStatus,
        limit: Duration,
    ) -> Result<(), CourierError> {
        let deadline = tokio::time::Instant::now() + limit;
        loop {
            if self
                .courier
                .status(account)
                .is_ok_and(|info| info.status == status)
            {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(CourierError::Timeout { duration: limit });
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    pub async fn shutdown(&self) {
        self.courier.dispose().await;
    }
}
