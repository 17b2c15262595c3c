// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Probes against live connection manager and queue instances.

use std::sync::Arc;

use courier_bus::EventBus;
use courier_config::model::{HealthConfig, QueueConfig, SessionConfig};
use courier_core::types::{AccountId, Direction, DisconnectReason, HealthLevel, SessionStatus};
use courier_health::{ConnectionProbe, HealthProbe, HealthService, QueueProbe, StorageProbe};
use courier_queue::MessageQueue;
use courier_session::ConnectionManager;
use courier_storage::Database;
use courier_test_utils::{MemorySessionStore, MockConnector};

fn manager(connector: Arc<MockConnector>) -> ConnectionManager {
    let settings = SessionConfig {
        connect_timeout_secs: 2,
        reconnect_delay_ms: 10,
        close_timeout_secs: 1,
        ..SessionConfig::default()
    };
    ConnectionManager::new(
        settings,
        connector,
        Arc::new(MemorySessionStore::new()),
        EventBus::new(64),
    )
}

#[tokio::test]
async fn connection_probe_follows_the_pool() {
    let connector = Arc::new(MockConnector::new());
    let manager = manager(connector.clone());
    let settings = HealthConfig {
        min_connected_ratio: 0.75,
        ..HealthConfig::default()
    };
    let probe = ConnectionProbe::new(manager.clone(), &settings);

    // Not started yet.
    assert_eq!(probe.probe().await.status, HealthLevel::Unhealthy);

    manager.start();
    assert_eq!(probe.probe().await.status, HealthLevel::Healthy);

    let a = AccountId::new("a").unwrap();
    let b = AccountId::new("b").unwrap();
    manager.connect(&a).await.unwrap();
    manager.connect(&b).await.unwrap();
    assert_eq!(probe.probe().await.status, HealthLevel::Healthy);

    connector
        .handle(&b)
        .unwrap()
        .drop_connection(DisconnectReason::LoggedOut)
        .await;
    let mut rx = manager.watch(&b).unwrap();
    rx.wait_for(|info| info.status == SessionStatus::Disconnected)
        .await
        .unwrap();

    let health = probe.probe().await;
    assert_eq!(health.status, HealthLevel::Degraded);
    assert_eq!(health.detail.as_deref(), Some("1/2 sessions connected"));

    manager.shutdown().await;
    assert_eq!(probe.probe().await.status, HealthLevel::Unhealthy);
}

#[tokio::test]
async fn operator_pause_is_healthy_and_survives_recovery() {
    let db = Arc::new(Database::open_in_memory().await.unwrap());
    let queue = MessageQueue::new(db.clone(), &QueueConfig::default());
    let settings = HealthConfig::default();
    let service = HealthService::new(
        settings.clone(),
        vec![
            Arc::new(QueueProbe::new(queue.clone(), &settings)) as Arc<dyn HealthProbe>,
            Arc::new(StorageProbe::new(db.clone())),
        ],
    );

    let report = service.check_now().await;
    assert_eq!(report.overall, HealthLevel::Unhealthy);
    assert_eq!(report.subsystems["queue"].status, HealthLevel::Unhealthy);

    queue.start().await.unwrap();
    queue.pause(Direction::Outbound);
    let report = service.check_now().await;
    assert_eq!(report.overall, HealthLevel::Healthy);
    assert_eq!(report.subsystems["queue"].status, HealthLevel::Healthy);

    assert!(service.attempt_recovery().await.is_empty());
    assert!(queue.is_paused(Direction::Outbound));

    // Called directly with a degraded report, QueueProbe still leaves operator pauses alone.
    let probe = QueueProbe::new(queue.clone(), &settings);
    let degraded = courier_core::types::SubsystemHealth::degraded("backlog");
    assert!(probe.recover(&degraded).await.is_empty());
    assert!(queue.is_paused(Direction::Outbound));

    queue.shutdown(std::time::Duration::from_secs(1)).await;
}

#[tokio::test]
async fn queue_recovery_releases_a_leftover_hold() {
    let db = Arc::new(Database::open_in_memory().await.unwrap());
    let queue = MessageQueue::new(db.clone(), &QueueConfig::default());
    let settings = HealthConfig::default();
    queue.start().await.unwrap();
    queue.hold(Direction::Outbound);
    queue.hold(Direction::Inbound);
    queue.pause(Direction::Inbound);

    let probe = QueueProbe::new(queue.clone(), &settings);
    let degraded = courier_core::types::SubsystemHealth::degraded("backlog");
    let actions = probe.recover(&degraded).await;
    assert_eq!(actions, vec!["released held outbound queue".to_string()]);
    assert!(!queue.is_held(Direction::Outbound));
    assert!(queue.is_held(Direction::Inbound));
    assert!(queue.is_paused(Direction::Inbound));

    queue.shutdown(std::time::Duration::from_secs(1)).await;
}

#[tokio::test]
async fn unreachable_store_is_reopened() {
    let dir = tempfile::tempdir().unwrap();
    let db = Arc::new(
        Database::open(&courier_config::model::StorageConfig {
            database_path: dir.path().join("jobs.db").to_string_lossy().into_owned(),
            ..Default::default()
        })
        .await
        .unwrap(),
    );
    let service = HealthService::new(
        HealthConfig::default(),
        vec![Arc::new(StorageProbe::new(db.clone())) as Arc<dyn HealthProbe>],
    );
    db.close().await.unwrap();
    assert_eq!(service.check_now().await.overall, HealthLevel::Unhealthy);

    let actions = service.attempt_recovery().await;
    assert_eq!(actions, vec!["reopened job store connection".to_string()]);
    assert_eq!(service.latest().unwrap().overall, HealthLevel::Healthy);
}
