//! Scheduler module for running probes on their cadences.
//!
//! Pings run on one shared cadence: every tick, each enabled target gets one
//! ping task. Route probes run on a slower cadence driven by one long-lived
//! task per enabled target, started the first time the target is seen and
//! stopped when it is disabled or removed.

mod retention;

pub use retention::*;

use crate::db::{DbError, Target};
use crate::engine::{Engine, ProbeKind};

use chrono::Duration as ChronoDuration;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};

/// Route probe cadence.
pub const ROUTE_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Timing knobs for the scheduler.
#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    pub ping_interval: Duration,
    pub route_interval: Duration,
    pub retention: ChronoDuration,
    pub cleanup_interval: Duration,
    /// How long shutdown waits for in-flight probes before aborting them.
    pub shutdown_grace: Duration,
    /// Upper bound of the random delay before each scheduled probe.
    pub start_jitter: Duration,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(60),
            route_interval: ROUTE_INTERVAL,
            retention: ChronoDuration::days(30),
            cleanup_interval: CLEANUP_INTERVAL,
            shutdown_grace: Duration::from_secs(10),
            start_jitter: Duration::from_millis(100),
        }
    }
}

struct RouteTask {
    stop: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

/// The main scheduler that orchestrates probe execution.
pub struct Scheduler {
    engine: Arc<Engine>,
    config: ScheduleConfig,
    route_tasks: RwLock<HashMap<i64, RouteTask>>,
    /// Route tasks told to stop that may still be finishing a probe.
    retiring: Mutex<Vec<JoinHandle<()>>>,
    stop: broadcast::Sender<()>,
    ping_loop: Mutex<Option<JoinHandle<()>>>,
    retention_manager: RetentionManager,
}

impl Scheduler {
    pub fn new(engine: Arc<Engine>, config: ScheduleConfig) -> Self {
        let (stop, _) = broadcast::channel(1);
        let retention_manager = RetentionManager::new(
            engine.store().clone(),
            config.retention,
            config.cleanup_interval,
        );

        Self {
            engine,
            config,
            route_tasks: RwLock::new(HashMap::new()),
            retiring: Mutex::new(Vec::new()),
            stop,
            ping_loop: Mutex::new(None),
            retention_manager,
        }
    }

    /// Start the ping cadence and the retention manager.
    pub async fn start(self: &Arc<Self>) -> Result<(), DbError> {
        let targets = self.engine.refresh_targets()?;
        tracing::info!("Starting scheduler with {} enabled targets", targets.len());

        let this = Arc::clone(self);
        let stop_rx = self.stop.subscribe();
        let handle = tokio::spawn(async move { this.run_ping_loop(stop_rx).await });
        *self.ping_loop.lock().await = Some(handle);

        self.retention_manager.start().await;
        Ok(())
    }

    /// IDs of targets that currently have a route task.
    #[cfg(test)]
    pub async fn route_targets(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.route_tasks.read().await.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Stop every cadence and wait for in-flight probes, up to the grace
    /// period. Anything still running after that is aborted, which kills its
    /// subprocess.
    pub async fn shutdown(&self) {
        tracing::info!("Scheduler: Shutting down");
        let _ = self.stop.send(());
        let deadline = Instant::now() + self.config.shutdown_grace;

        // The ping loop reconciles route tasks, so it must be gone before
        // the route task map is drained.
        if let Some(handle) = self.ping_loop.lock().await.take() {
            self.join_until(deadline, handle).await;
        }

        let mut handles = Vec::new();
        for (_, task) in self.route_tasks.write().await.drain() {
            let _ = task.stop.send(());
            handles.push(task.handle);
        }
        handles.extend(self.retiring.lock().await.drain(..));
        if let Some(handle) = self.retention_manager.stop().await {
            handles.push(handle);
        }

        for handle in handles {
            self.join_until(deadline, handle).await;
        }
        tracing::info!("Scheduler: Stopped");
    }

    async fn join_until(&self, deadline: Instant, mut handle: JoinHandle<()>) {
        if tokio::time::timeout_at(deadline, &mut handle).await.is_err() {
            tracing::warn!(
                "Scheduler: Task still running after {:?}, aborting",
                self.config.shutdown_grace
            );
            handle.abort();
        }
    }

    async fn run_ping_loop(&self, mut stop_rx: broadcast::Receiver<()>) {
        let mut interval = tokio::time::interval(self.config.ping_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut in_flight = JoinSet::new();

        loop {
            tokio::select! {
                _ = stop_rx.recv() => break,
                _ = interval.tick() => {
                    while in_flight.try_join_next().is_some() {}
                    self.run_ping_cycle(&mut in_flight).await;
                }
            }
        }

        let deadline = Instant::now() + self.config.shutdown_grace;
        while !in_flight.is_empty() {
            match tokio::time::timeout_at(deadline, in_flight.join_next()).await {
                Ok(_) => {}
                Err(_) => {
                    tracing::warn!("Scheduler: Aborting {} in-flight pings", in_flight.len());
                    in_flight.shutdown().await;
                }
            }
        }
    }

    /// One ping tick: refresh the registry, reconcile route tasks, then fan
    /// out one ping per enabled target.
    async fn run_ping_cycle(&self, in_flight: &mut JoinSet<()>) {
        let targets = match self.engine.refresh_targets() {
            Ok(targets) => targets,
            Err(e) => {
                tracing::error!("Scheduler: Failed to load targets: {}", e);
                return;
            }
        };

        self.reconcile_route_tasks(&targets).await;
        tracing::debug!("Scheduler: Pinging {} targets", targets.len());

        for target in targets {
            let Some(guard) = self.engine.try_lock(ProbeKind::Ping, target.id) else {
                tracing::warn!("Skipping ping for {}: previous probe still running", target.name);
                continue;
            };

            let engine = self.engine.clone();
            let jitter = self.config.start_jitter;
            in_flight.spawn(async move {
                let _guard = guard;
                sleep_jitter(jitter).await;

                match engine.probe_ping(&target).await {
                    Ok(sample) => tracing::debug!(
                        "Ping {}: avg={:?}ms loss={}%",
                        target.name,
                        sample.avg_rtt,
                        sample.packet_loss
                    ),
                    Err(e) => tracing::error!("Failed to store ping sample for {}: {}", target.name, e),
                }
            });
        }
    }

    /// Start route tasks for newly enabled targets and stop those for
    /// targets that were disabled or removed.
    async fn reconcile_route_tasks(&self, enabled: &[Target]) {
        let wanted: HashSet<i64> = enabled.iter().map(|t| t.id).collect();
        let mut tasks = self.route_tasks.write().await;
        let mut retiring = self.retiring.lock().await;

        let stale: Vec<i64> = tasks.keys().filter(|id| !wanted.contains(id)).copied().collect();
        for id in stale {
            if let Some(task) = tasks.remove(&id) {
                let _ = task.stop.send(());
                retiring.push(task.handle);
                self.engine.forget_target(id);
                tracing::info!("Scheduler: Removed route probes for target {}", id);
            }
        }
        retiring.retain(|handle| !handle.is_finished());

        for target in enabled {
            if tasks.contains_key(&target.id) {
                continue;
            }
            tracing::info!("Scheduler: Adding route probes for {}", target.name);
            let (stop_tx, stop_rx) = broadcast::channel(1);
            let handle = tokio::spawn(run_route_loop(
                self.engine.clone(),
                target.id,
                self.config.route_interval,
                self.config.start_jitter,
                stop_rx,
            ));
            tasks.insert(target.id, RouteTask { stop: stop_tx, handle });
        }
    }
}

/// Route cadence for one target. The first probe fires immediately.
async fn run_route_loop(
    engine: Arc<Engine>,
    target_id: i64,
    period: Duration,
    jitter: Duration,
    mut stop_rx: broadcast::Receiver<()>,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = stop_rx.recv() => break,
            _ = interval.tick() => {
                // Read the latest definition so host edits take effect.
                let Some(target) = engine.enabled_target(target_id) else {
                    continue;
                };
                let _guard = engine.lock(ProbeKind::Route, target_id).await;
                sleep_jitter(jitter).await;

                match engine.probe_route(&target).await {
                    Ok(sample) => tracing::info!(
                        "Route {}: {} hops via {}",
                        target.name,
                        sample.total_hops,
                        sample.source.map(|s| s.as_str()).unwrap_or("none")
                    ),
                    Err(e) => tracing::error!("Failed to store route sample for {}: {}", target.name, e),
                }
            }
        }
    }
}

/// Spread probe starts to avoid a burst of subprocesses on every tick.
async fn sleep_jitter(max: Duration) {
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return;
    }
    let jitter = rand::random::<u64>() % max_ms;
    tokio::time::sleep(Duration::from_millis(jitter)).await;
}
