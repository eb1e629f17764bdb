//! Single-flight hot reload scheduling.
//!
//! # States
//! ```text
//! Idle ──trigger──▶ Running ──ok, slot unchanged──▶ Idle
//!                     │  ▲
//!                     │  └──ok, newer config in slot──┘
//!                     ▼
//!                PendingRetry ──retry delay──▶ Running
//! ```
//!
//! # Design Decisions
//! - One pending slot, overwritten by every trigger; no queue
//! - The slot is cleared only if it still holds the config that just
//!   succeeded, so a trigger landing mid-cycle causes exactly one more cycle
//! - Failures never reach the caller; they are logged and retried
//! - `stop()` lets an in-flight cycle finish but schedules nothing after it

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use tokio::sync::{broadcast, watch, Notify};
use tokio::task::JoinHandle;

use crate::observability::metrics;
use crate::reload::cycle::ReloadCycle;
use crate::reload::types::ReloadConfig;

/// What caused a reload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadTrigger {
    Startup,
    File,
    Signal,
    ChangeAfterLoad,
}

impl fmt::Display for ReloadTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ReloadTrigger::Startup => "startup",
            ReloadTrigger::File => "file",
            ReloadTrigger::Signal => "SIGHUP",
            ReloadTrigger::ChangeAfterLoad => "change-after-load",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadCycleState {
    Idle,
    Running,
    PendingRetry,
}

/// Result of one finished cycle.
#[derive(Debug, Clone)]
pub struct ReloadOutcome {
    pub trigger: ReloadTrigger,
    pub config: Arc<ReloadConfig>,
    /// Error message when the cycle failed.
    pub error: Option<String>,
    pub duration: Duration,
}

impl ReloadOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

struct PendingReload {
    config: Arc<ReloadConfig>,
    trigger: ReloadTrigger,
}

struct Shared {
    pending: ArcSwapOption<PendingReload>,
    wake: Notify,
    state: watch::Sender<ReloadCycleState>,
    stop: watch::Sender<bool>,
    outcomes: broadcast::Sender<ReloadOutcome>,
}

/// Accepts reload triggers from any task and runs at most one cycle at a time.
#[derive(Clone)]
pub struct HotReloadCoordinator {
    shared: Arc<Shared>,
}

impl HotReloadCoordinator {
    /// Start the reload loop.
    pub fn spawn<C: ReloadCycle>(cycle: C, retry_delay: Duration) -> (Self, JoinHandle<()>) {
        let (state, _) = watch::channel(ReloadCycleState::Idle);
        let (stop, _) = watch::channel(false);
        let (outcomes, _) = broadcast::channel(16);
        let shared = Arc::new(Shared {
            pending: ArcSwapOption::empty(),
            wake: Notify::new(),
            state,
            stop,
            outcomes,
        });

        let reload_loop = ReloadLoop {
            shared: Arc::clone(&shared),
            cycle,
            retry_delay,
        };
        let handle = tokio::spawn(reload_loop.run());

        (Self { shared }, handle)
    }

    /// Record `config` as the next configuration to apply and make sure a
    /// cycle will pick it up. Returns immediately.
    pub fn trigger(&self, config: impl Into<Arc<ReloadConfig>>, trigger: ReloadTrigger) {
        if self.is_stopped() {
            tracing::debug!(trigger = %trigger, "Reload coordinator stopped, ignoring trigger");
            return;
        }

        self.shared.pending.store(Some(Arc::new(PendingReload {
            config: config.into(),
            trigger,
        })));
        tracing::info!(trigger = %trigger, "Config reload triggered");
        if self.state() != ReloadCycleState::Idle {
            tracing::info!("Config reload is in progress. Waiting to finish.");
        }
        self.shared.wake.notify_one();
    }

    /// Stop scheduling cycles. Safe to call repeatedly and mid-cycle.
    pub fn stop(&self) {
        if !self.shared.stop.send_replace(true) {
            tracing::info!("Reload coordinator stopping");
        }
    }

    pub fn is_stopped(&self) -> bool {
        *self.shared.stop.borrow()
    }

    /// Resolves once [`stop`](Self::stop) has been called.
    pub async fn stopped(&self) {
        let mut stop = self.shared.stop.subscribe();
        let _ = stop.wait_for(|stopped| *stopped).await;
    }

    pub fn state(&self) -> ReloadCycleState {
        *self.shared.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ReloadCycleState> {
        self.shared.state.subscribe()
    }

    /// Receive an outcome for every cycle finished after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<ReloadOutcome> {
        self.shared.outcomes.subscribe()
    }
}

struct ReloadLoop<C> {
    shared: Arc<Shared>,
    cycle: C,
    retry_delay: Duration,
}

impl<C: ReloadCycle> ReloadLoop<C> {
    async fn run(self) {
        let mut stop = self.shared.stop.subscribe();
        loop {
            tokio::select! {
                _ = self.shared.wake.notified() => {}
                _ = stop.wait_for(|stopped| *stopped) => break,
            }
            if !self.drain(&mut stop).await {
                break;
            }
            self.set_state(ReloadCycleState::Idle);
        }
        self.set_state(ReloadCycleState::Idle);
        tracing::debug!("Reload loop stopped");
    }

    /// Run cycles until the slot is empty. Returns `false` once stopped.
    async fn drain(&self, stop: &mut watch::Receiver<bool>) -> bool {
        loop {
            if *stop.borrow() {
                return false;
            }
            let current = self.shared.pending.load_full();
            let Some(reload) = current.clone() else {
                return true;
            };

            self.set_state(ReloadCycleState::Running);
            tracing::info!(trigger = %reload.trigger, "Config reload starting");
            let started = Instant::now();
            let result = self.cycle.run(&reload.config).await;
            let duration = started.elapsed();
            metrics::record_reload(result.is_ok(), duration);

            match result {
                Ok(()) => {
                    self.shared
                        .pending
                        .compare_and_swap(&current, None::<Arc<PendingReload>>);
                    self.publish(&reload, None, duration);
                    tracing::info!(
                        trigger = %reload.trigger,
                        elapsed_ms = duration.as_millis() as u64,
                        "Config reload completed"
                    );
                }
                Err(err) => {
                    if *stop.borrow() {
                        self.publish(&reload, Some(err.to_string()), duration);
                        return false;
                    }
                    tracing::error!(
                        trigger = %reload.trigger,
                        error = %err,
                        retry_in_ms = self.retry_delay.as_millis() as u64,
                        "Config reload failed"
                    );
                    self.set_state(ReloadCycleState::PendingRetry);
                    self.publish(&reload, Some(err.to_string()), duration);
                    tokio::select! {
                        _ = tokio::time::sleep(self.retry_delay) => {}
                        _ = stop.wait_for(|stopped| *stopped) => return false,
                    }
                }
            }
        }
    }

    fn publish(&self, reload: &PendingReload, error: Option<String>, duration: Duration) {
        let _ = self.shared.outcomes.send(ReloadOutcome {
            trigger: reload.trigger,
            config: Arc::clone(&reload.config),
            error,
            duration,
        });
    }

    fn set_state(&self, state: ReloadCycleState) {
        self.shared.state.send_replace(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin::AdminError;
    use crate::reload::error::{ReloadError, ReloadResult, ReloadStep};
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use tokio::sync::Semaphore;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    fn marked(marker: u32) -> ReloadConfig {
        let params = BTreeMap::from([("marker".to_string(), marker.to_string())]);
        ReloadConfig::new(Vec::new(), params, false).unwrap()
    }

    fn marker_of(config: &ReloadConfig) -> u32 {
        config.parameters()["marker"].parse().unwrap()
    }

    /// Cycle that blocks on a gate and fails a set number of times first.
    struct GatedCycle {
        gate: Arc<Semaphore>,
        runs: Arc<Mutex<Vec<u32>>>,
        failures_left: AtomicU32,
    }

    impl ReloadCycle for GatedCycle {
        async fn run(&self, config: &ReloadConfig) -> ReloadResult<()> {
            self.runs.lock().unwrap().push(marker_of(config));
            self.gate.acquire().await.unwrap().forget();
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(ReloadError::Step {
                    step: ReloadStep::Activating { id: "x_1".into() },
                    source: AdminError::Disconnected,
                });
            }
            Ok(())
        }
    }

    fn gated(failures: u32) -> (GatedCycle, Arc<Semaphore>, Arc<Mutex<Vec<u32>>>) {
        let gate = Arc::new(Semaphore::new(0));
        let runs = Arc::new(Mutex::new(Vec::new()));
        let cycle = GatedCycle {
            gate: Arc::clone(&gate),
            runs: Arc::clone(&runs),
            failures_left: AtomicU32::new(failures),
        };
        (cycle, gate, runs)
    }

    async fn wait_for_state(coordinator: &HotReloadCoordinator, wanted: ReloadCycleState) {
        let mut state = coordinator.watch_state();
        timeout(WAIT, state.wait_for(|s| *s == wanted))
            .await
            .expect("state not reached")
            .unwrap();
    }

    #[tokio::test]
    async fn triggers_during_a_run_collapse_into_one_more_cycle() {
        let (cycle, gate, runs) = gated(0);
        let (coordinator, _handle) = HotReloadCoordinator::spawn(cycle, Duration::from_millis(10));
        let mut outcomes = coordinator.subscribe();

        coordinator.trigger(marked(0), ReloadTrigger::Startup);
        wait_for_state(&coordinator, ReloadCycleState::Running).await;

        for marker in 1..=5 {
            coordinator.trigger(marked(marker), ReloadTrigger::File);
        }
        gate.add_permits(10);

        for _ in 0..2 {
            let outcome = timeout(WAIT, outcomes.recv()).await.unwrap().unwrap();
            assert!(outcome.is_success());
        }
        wait_for_state(&coordinator, ReloadCycleState::Idle).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(*runs.lock().unwrap(), vec![0, 5]);
        coordinator.stop();
    }

    #[tokio::test]
    async fn failed_cycle_is_retried_with_latest_config() {
        let (cycle, gate, runs) = gated(1);
        let (coordinator, _handle) = HotReloadCoordinator::spawn(cycle, Duration::from_millis(200));
        let mut outcomes = coordinator.subscribe();

        coordinator.trigger(marked(1), ReloadTrigger::Startup);
        gate.add_permits(1);

        let failed = timeout(WAIT, outcomes.recv()).await.unwrap().unwrap();
        assert!(!failed.is_success());
        wait_for_state(&coordinator, ReloadCycleState::PendingRetry).await;

        coordinator.trigger(marked(2), ReloadTrigger::Signal);
        gate.add_permits(1);

        let retried = timeout(WAIT, outcomes.recv()).await.unwrap().unwrap();
        assert!(retried.is_success());
        assert_eq!(retried.trigger, ReloadTrigger::Signal);
        assert_eq!(*runs.lock().unwrap(), vec![1, 2]);
        coordinator.stop();
    }

    #[tokio::test]
    async fn stop_lets_the_running_cycle_finish() {
        let (cycle, gate, runs) = gated(0);
        let (coordinator, handle) = HotReloadCoordinator::spawn(cycle, Duration::from_millis(10));
        let mut outcomes = coordinator.subscribe();

        coordinator.trigger(marked(1), ReloadTrigger::Startup);
        wait_for_state(&coordinator, ReloadCycleState::Running).await;
        coordinator.trigger(marked(2), ReloadTrigger::File);
        coordinator.stop();
        coordinator.stop();
        gate.add_permits(10);

        let outcome = timeout(WAIT, outcomes.recv()).await.unwrap().unwrap();
        assert!(outcome.is_success());
        timeout(WAIT, handle).await.unwrap().unwrap();

        assert_eq!(*runs.lock().unwrap(), vec![1]);
        coordinator.trigger(marked(3), ReloadTrigger::File);
        assert_eq!(coordinator.state(), ReloadCycleState::Idle);
    }

    #[tokio::test]
    async fn stop_cancels_the_retry_delay() {
        let (cycle, gate, _runs) = gated(1);
        let (coordinator, handle) = HotReloadCoordinator::spawn(cycle, Duration::from_secs(3600));
        gate.add_permits(1);

        coordinator.trigger(marked(1), ReloadTrigger::Startup);
        wait_for_state(&coordinator, ReloadCycleState::PendingRetry).await;
        coordinator.stop();

        timeout(WAIT, handle).await.unwrap().unwrap();
        assert_eq!(coordinator.state(), ReloadCycleState::Idle);
    }
}
