// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Periodic health evaluation and recovery.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use courier_config::model::HealthConfig;
use courier_core::types::{HealthLevel, HealthStatus, SubsystemHealth};

use crate::probe::HealthProbe;

/// Upper bound for a single probe before it counts as unhealthy.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

struct Inner {
    settings: HealthConfig,
    probes: Vec<Arc<dyn HealthProbe>>,
    latest: ArcSwapOption<HealthStatus>,
    recovering: AtomicBool,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Runs every probe on an interval and publishes the composite report.
#[derive(Clone)]
pub struct HealthService {
    inner: Arc<Inner>,
}

/// Clears the in-progress flag when a recovery round ends, even by panic.
struct RecoveryGuard<'a>(&'a AtomicBool);

impl Drop for RecoveryGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl HealthService {
    pub fn new(settings: HealthConfig, probes: Vec<Arc<dyn HealthProbe>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                settings,
                probes,
                latest: ArcSwapOption::empty(),
                recovering: AtomicBool::new(false),
                cancel: CancellationToken::new(),
                task: Mutex::new(None),
            }),
        }
    }

    /// Most recent report, if any round has completed.
    pub fn latest(&self) -> Option<Arc<HealthStatus>> {
        self.inner.latest.load_full()
    }

    /// Runs every probe now and publishes the result.
    pub async fn check_now(&self) -> HealthStatus {
        let results = join_all(self.inner.probes.iter().map(|probe| async move {
            let health = match tokio::time::timeout(PROBE_TIMEOUT, probe.probe()).await {
                Ok(health) => health,
                Err(_) => SubsystemHealth::unhealthy("probe timed out"),
            };
            (probe.name().to_string(), health)
        }))
        .await;

        let report = HealthStatus::aggregate(results.into_iter().collect::<BTreeMap<_, _>>());
        let previous = self.inner.latest.swap(Some(Arc::new(report.clone())));
        let before = previous.map(|p| p.overall);
        if before != Some(report.overall) {
            if report.overall == HealthLevel::Healthy {
                info!(overall = %report.overall, "health changed");
            } else {
                warn!(
                    overall = %report.overall,
                    subsystems = ?report
                        .subsystems
                        .iter()
                        .filter(|(_, s)| s.status != HealthLevel::Healthy)
                        .map(|(name, s)| (name.as_str(), s.detail.as_deref().unwrap_or("")))
                        .collect::<Vec<_>>(),
                    "health changed"
                );
            }
        } else {
            debug!(overall = %report.overall, "health checked");
        }
        report
    }

    /// Probes, then remediates each subsystem that is not healthy.
    ///
    /// Healthy subsystems are never touched. A round that starts while
    /// another is in progress does nothing. Returns the actions taken.
    pub async fn attempt_recovery(&self) -> Vec<String> {
        if self.inner.recovering.swap(true, Ordering::AcqRel) {
            debug!("recovery already in progress");
            return Vec::new();
        }
        let _guard = RecoveryGuard(&self.inner.recovering);

        let report = self.check_now().await;
        let mut actions = Vec::new();
        for probe in &self.inner.probes {
            let Some(current) = report.subsystems.get(probe.name()) else {
                continue;
            };
            if current.status == HealthLevel::Healthy {
                continue;
            }
            actions.extend(probe.recover(current).await);
        }

        if actions.is_empty() {
            debug!(overall = %report.overall, "no recovery action available");
        } else {
            info!(?actions, "recovery actions taken");
            self.check_now().await;
        }
        actions
    }

    /// Starts the interval loop. Calling it twice is a no-op.
    pub fn start(&self) {
        let mut slot = self.inner.task.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return;
        }
        let service = self.clone();
        let every = Duration::from_secs(self.inner.settings.interval_secs.max(1));
        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = service.inner.cancel.cancelled() => break,
                }
                let report = service.check_now().await;
                if service.inner.settings.auto_recover && report.overall != HealthLevel::Healthy {
                    service.attempt_recovery().await;
                }
            }
            debug!("health loop stopped");
        }));
        info!(
            interval_secs = every.as_secs(),
            probes = self.inner.probes.len(),
            "health service started"
        );
    }

    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        let task = self
            .inner
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;

    use super::*;

    struct FixedProbe {
        name: &'static str,
        health: Mutex<SubsystemHealth>,
        /// What a recovery round switches the probe to.
        heals_to: Option<SubsystemHealth>,
        recover_delay: Duration,
        recoveries: AtomicUsize,
        probes: AtomicUsize,
    }

    impl FixedProbe {
        fn new(name: &'static str, health: SubsystemHealth) -> Self {
            Self {
                name,
                health: Mutex::new(health),
                heals_to: None,
                recover_delay: Duration::ZERO,
                recoveries: AtomicUsize::new(0),
                probes: AtomicUsize::new(0),
            }
        }

        fn healing(mut self) -> Self {
            self.heals_to = Some(SubsystemHealth::healthy());
            self
        }

        fn slow(mut self, delay: Duration) -> Self {
            self.recover_delay = delay;
            self
        }
    }

    #[async_trait]
    impl HealthProbe for FixedProbe {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn probe(&self) -> SubsystemHealth {
            self.probes.fetch_add(1, Ordering::SeqCst);
            self.health.lock().unwrap().clone()
        }

        async fn recover(&self, _current: &SubsystemHealth) -> Vec<String> {
            self.recoveries.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.recover_delay).await;
            match &self.heals_to {
                Some(next) => {
                    *self.health.lock().unwrap() = next.clone();
                    vec![format!("healed {}", self.name)]
                }
                None => Vec::new(),
            }
        }
    }

    fn service(probes: Vec<Arc<FixedProbe>>) -> HealthService {
        let probes = probes
            .into_iter()
            .map(|p| p as Arc<dyn HealthProbe>)
            .collect();
        HealthService::new(
            HealthConfig {
                interval_secs: 1,
                ..HealthConfig::default()
            },
            probes,
        )
    }

    #[tokio::test]
    async fn worst_subsystem_wins() {
        let svc = service(vec![
            Arc::new(FixedProbe::new("a", SubsystemHealth::healthy())),
            Arc::new(FixedProbe::new("b", SubsystemHealth::degraded("slow"))),
        ]);
        assert!(svc.latest().is_none());
        let report = svc.check_now().await;
        assert_eq!(report.overall, HealthLevel::Degraded);
        assert_eq!(svc.latest().unwrap().overall, HealthLevel::Degraded);

        let svc = service(vec![
            Arc::new(FixedProbe::new("a", SubsystemHealth::unhealthy("down"))),
            Arc::new(FixedProbe::new("b", SubsystemHealth::degraded("slow"))),
        ]);
        assert_eq!(svc.check_now().await.overall, HealthLevel::Unhealthy);
    }

    #[tokio::test]
    async fn recovery_skips_healthy_subsystems() {
        let good = Arc::new(FixedProbe::new("good", SubsystemHealth::healthy()));
        let bad = Arc::new(FixedProbe::new("bad", SubsystemHealth::unhealthy("down")).healing());
        let svc = service(vec![good.clone(), bad.clone()]);

        let actions = svc.attempt_recovery().await;
        assert_eq!(actions, vec!["healed bad".to_string()]);
        assert_eq!(good.recoveries.load(Ordering::SeqCst), 0);
        assert_eq!(bad.recoveries.load(Ordering::SeqCst), 1);
        assert_eq!(svc.latest().unwrap().overall, HealthLevel::Healthy);

        // Nothing left to fix.
        assert!(svc.attempt_recovery().await.is_empty());
        assert_eq!(bad.recoveries.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn overlapping_recovery_rounds_run_once() {
        let bad = Arc::new(
            FixedProbe::new("bad", SubsystemHealth::degraded("paused"))
                .healing()
                .slow(Duration::from_millis(100)),
        );
        let svc = service(vec![bad.clone()]);
        let (first, second) = tokio::join!(svc.attempt_recovery(), svc.attempt_recovery());
        assert_eq!(first.len() + second.len(), 1);
        assert_eq!(bad.recoveries.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn interval_loop_probes_and_recovers() {
        let bad = Arc::new(FixedProbe::new("bad", SubsystemHealth::degraded("paused")).healing());
        let svc = service(vec![bad.clone()]);
        svc.start();
        svc.start();

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert!(bad.probes.load(Ordering::SeqCst) >= 3);
        assert_eq!(bad.recoveries.load(Ordering::SeqCst), 1);
        assert_eq!(svc.latest().unwrap().overall, HealthLevel::Healthy);

        svc.shutdown().await;
        let probes = bad.probes.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(bad.probes.load(Ordering::SeqCst), probes);
    }
}
