//! The probing engine: executors wired to the store.
//!
//! One `Engine` is built at startup and shared by the scheduler and the web
//! layer. It owns the store handle, the subprocess runner, the current target
//! snapshot and the per-target locks that keep a target from being probed
//! twice at once.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::analysis::{compute_timeline, summarize, TargetStatistics, TimelinePoint};
use crate::db::{DbError, PingSample, RouteSample, Store, Target};
use crate::probe::{run_ping, run_route, CommandRunner, ProbeConfig};

/// The two independent probe cadences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProbeKind {
    Ping,
    Route,
}

/// Held while a probe of one kind runs against one target.
pub type ProbeGuard = OwnedMutexGuard<()>;

#[derive(Default)]
struct ProbeLocks {
    slots: Mutex<HashMap<(i64, ProbeKind), Arc<AsyncMutex<()>>>>,
}

impl ProbeLocks {
    fn slot(&self, target_id: i64, kind: ProbeKind) -> Arc<AsyncMutex<()>> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.entry((target_id, kind)).or_default().clone()
    }

    fn forget(&self, target_id: i64) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        // Slots still held by a running probe stay so a re-enabled target
        // cannot be probed twice at once.
        slots.retain(|(id, _), slot| *id != target_id || Arc::strong_count(slot) > 1);
    }
}

pub struct Engine {
    store: Arc<Store>,
    runner: Arc<dyn CommandRunner>,
    probe_config: ProbeConfig,
    targets: RwLock<Vec<Target>>,
    locks: ProbeLocks,
}

impl Engine {
    pub fn new(store: Arc<Store>, runner: Arc<dyn CommandRunner>, probe_config: ProbeConfig) -> Self {
        Self {
            store,
            runner,
            probe_config,
            targets: RwLock::new(Vec::new()),
            locks: ProbeLocks::default(),
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    // --- Target snapshot ---

    /// Reload targets from the registry and return the enabled ones.
    pub fn refresh_targets(&self) -> Result<Vec<Target>, DbError> {
        let targets = self.store.get_targets()?;
        let enabled = targets.iter().filter(|t| t.enabled).cloned().collect();
        *self.targets.write().unwrap_or_else(PoisonError::into_inner) = targets;
        Ok(enabled)
    }

    /// Targets as of the last refresh.
    pub fn targets(&self) -> Vec<Target> {
        self.targets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// An enabled target from the last refresh.
    pub fn enabled_target(&self, id: i64) -> Option<Target> {
        self.targets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|t| t.id == id && t.enabled)
            .cloned()
    }

    /// Drop per-target state for a target that is no longer monitored.
    pub fn forget_target(&self, id: i64) {
        self.locks.forget(id);
    }

    // --- Locking ---

    /// Claim a target for one probe kind, or `None` if a probe is in flight.
    pub fn try_lock(&self, kind: ProbeKind, target_id: i64) -> Option<ProbeGuard> {
        self.locks.slot(target_id, kind).try_lock_owned().ok()
    }

    /// Wait until no probe of this kind runs against the target.
    pub async fn lock(&self, kind: ProbeKind, target_id: i64) -> ProbeGuard {
        self.locks.slot(target_id, kind).lock_owned().await
    }

    // --- Probes ---

    /// Ping a target and append the sample. The caller holds the lock.
    pub async fn probe_ping(&self, target: &Target) -> Result<PingSample, DbError> {
        let sample = run_ping(self.runner.as_ref(), target, &self.probe_config).await;
        self.store.append_ping(&sample)?;
        Ok(sample)
    }

    /// Trace a target and append the sample. The caller holds the lock.
    pub async fn probe_route(&self, target: &Target) -> Result<RouteSample, DbError> {
        let sample = run_route(self.runner.as_ref(), target, &self.probe_config).await;
        self.store.append_route(&sample)?;
        Ok(sample)
    }

    /// Ping a target now, waiting for any scheduled ping of it to finish.
    pub async fn trigger_ping(&self, target_id: i64) -> Result<PingSample, DbError> {
        let target = self.store.get_target(target_id)?;
        let _guard = self.lock(ProbeKind::Ping, target_id).await;
        self.probe_ping(&target).await
    }

    /// Trace a target now, waiting for any scheduled trace of it to finish.
    pub async fn trigger_route(&self, target_id: i64) -> Result<RouteSample, DbError> {
        let target = self.store.get_target(target_id)?;
        let _guard = self.lock(ProbeKind::Route, target_id).await;
        self.probe_route(&target).await
    }

    // --- Analysis ---

    /// Classify an already ordered window of samples.
    pub fn compute_timeline(samples: &[PingSample]) -> Vec<TimelinePoint> {
        compute_timeline(samples)
    }

    /// Timeline for a target's samples since `since`, oldest first.
    pub fn timeline(
        &self,
        target_id: i64,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TimelinePoint>, DbError> {
        let mut samples = self.store.query_ping_range(target_id, since, limit)?;
        samples.reverse();
        Ok(Self::compute_timeline(&samples))
    }

    /// Summary statistics for a target's samples since `since`.
    pub fn statistics(
        &self,
        target_id: i64,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<TargetStatistics, DbError> {
        let samples = self.store.query_ping_range(target_id, since, limit)?;
        Ok(summarize(&samples))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::AnomalyKind;
    use crate::db::RouteSource;
    use crate::parse::{parse_traceroute, Platform};
    use crate::probe::testing::{Script, ScriptedRunner};
    use chrono::Duration as ChronoDuration;
    use tempfile::NamedTempFile;
    use tokio_test::{assert_err, assert_ok};

    const TRACEROUTE: &str = "traceroute to 8.8.8.8 (8.8.8.8), 30 hops max, 60 byte packets
 1  192.168.1.1  0.512 ms  0.498 ms  0.476 ms
 2  100.64.0.1  4.210 ms  4.190 ms  4.305 ms
 3  * * *
 4  8.8.8.8  11.024 ms  10.998 ms  11.310 ms
";

    const PING: &str = "--- 8.8.8.8 ping statistics ---
10 packets transmitted, 10 received, 0% packet loss, time 9012ms
rtt min/avg/max/mdev = 10.100/11.200/12.300/0.800 ms
";

    fn engine(runner: ScriptedRunner) -> (NamedTempFile, Engine, i64) {
        let tmp = NamedTempFile::new().unwrap();
        let store = Arc::new(Store::new(tmp.path()).unwrap());
        let mut target = Target {
            name: "Google DNS".to_string(),
            host: "8.8.8.8".to_string(),
            ..Default::default()
        };
        let id = store.add_target(&mut target).unwrap();
        let config = ProbeConfig {
            platform: Platform::Gnu,
            ..Default::default()
        };
        (tmp, Engine::new(store, Arc::new(runner), config), id)
    }

    #[tokio::test]
    async fn test_mtr_timeout_falls_back_to_traceroute() {
        let runner = ScriptedRunner::new()
            .on("mtr", Script::Timeout)
            .on("traceroute", Script::ok(TRACEROUTE));
        let (_tmp, engine, id) = engine(runner);

        let sample = assert_ok!(engine.trigger_route(id).await);
        let parsed = parse_traceroute(TRACEROUTE).len();
        assert_eq!(sample.total_hops as usize, parsed);
        assert_eq!(sample.destination_reached, parsed > 0);
        assert_eq!(sample.source, Some(RouteSource::Traceroute));

        let stored = engine
            .store()
            .query_route_range(id, Utc::now() - ChronoDuration::hours(1), 10)
            .unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].hops, sample.hops);
    }

    #[tokio::test]
    async fn test_unreachable_target_records_loss_samples() {
        let runner = ScriptedRunner::new().on("ping", Script::Timeout);
        let (_tmp, engine, id) = engine(runner);

        for _ in 0..3 {
            let sample = assert_ok!(engine.trigger_ping(id).await);
            assert!(!sample.is_alive);
        }

        let since = Utc::now() - ChronoDuration::hours(1);
        let stored = engine.store().query_ping_range(id, since, 100).unwrap();
        assert_eq!(stored.len(), 3);
        assert!(stored.iter().all(|s| s.packet_loss == 100.0 && s.avg_rtt.is_none()));

        let stats = engine.statistics(id, since, 100).unwrap();
        assert_eq!(stats.uptime_percentage, Some(0.0));

        let timeline = engine.timeline(id, since, 100).unwrap();
        assert!(timeline.iter().all(|p| p.kind == AnomalyKind::Loss));
        assert!(timeline.windows(2).all(|w| w[0].time <= w[1].time));
    }

    #[tokio::test]
    async fn test_trigger_unknown_target() {
        let (_tmp, engine, _) = engine(ScriptedRunner::new().on("ping", Script::ok(PING)));
        let result = engine.trigger_ping(9999).await;
        assert!(matches!(assert_err!(result), DbError::NotFound));
    }

    #[tokio::test]
    async fn test_probe_locks_are_per_kind_and_target() {
        let (_tmp, engine, id) = engine(ScriptedRunner::new());

        let held = engine.try_lock(ProbeKind::Ping, id);
        assert!(held.is_some());
        assert!(engine.try_lock(ProbeKind::Ping, id).is_none());
        assert!(engine.try_lock(ProbeKind::Route, id).is_some());
        assert!(engine.try_lock(ProbeKind::Ping, id + 1).is_some());

        drop(held);
        assert!(engine.try_lock(ProbeKind::Ping, id).is_some());
    }

    #[tokio::test]
    async fn test_refresh_reports_enabled_targets() {
        let (_tmp, engine, id) = engine(ScriptedRunner::new());
        let mut other = Target {
            name: "Off".to_string(),
            host: "192.0.2.1".to_string(),
            enabled: false,
            ..Default::default()
        };
        engine.store().add_target(&mut other).unwrap();

        let enabled = engine.refresh_targets().unwrap();
        assert_eq!(enabled.iter().map(|t| t.id).collect::<Vec<_>>(), vec![id]);
        assert_eq!(engine.targets().len(), 2);
        assert!(engine.enabled_target(id).is_some());
        assert!(engine.enabled_target(other.id).is_none());
    }
}
