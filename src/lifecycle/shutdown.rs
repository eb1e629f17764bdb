//! Shutdown coordination for the sidecar.

use std::time::Duration;

use tokio::task::JoinHandle;

use crate::reload::HotReloadCoordinator;

/// Default time a running reload cycle gets to finish.
pub const DEFAULT_GRACE: Duration = Duration::from_secs(30);

/// Stops the reload loop, letting a running cycle finish within a deadline.
pub struct Shutdown {
    grace: Duration,
}

impl Shutdown {
    pub fn new(grace: Duration) -> Self {
        Self { grace }
    }

    /// Stop `coordinator` and wait for its loop to exit.
    ///
    /// Returns `false` when the loop had to be aborted after the grace period.
    pub async fn run(&self, coordinator: &HotReloadCoordinator, mut reload_loop: JoinHandle<()>) -> bool {
        coordinator.stop();

        match tokio::time::timeout(self.grace, &mut reload_loop).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Reload loop terminated abnormally");
                true
            }
            Err(_) => {
                tracing::warn!(
                    grace_ms = self.grace.as_millis() as u64,
                    "Reload cycle did not finish in time, aborting"
                );
                reload_loop.abort();
                false
            }
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new(DEFAULT_GRACE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reload::{ReloadConfig, ReloadCycle, ReloadCycleState, ReloadResult, ReloadTrigger};
    use std::collections::BTreeMap;

    struct Slow(Duration);

    impl ReloadCycle for Slow {
        async fn run(&self, _config: &ReloadConfig) -> ReloadResult<()> {
            tokio::time::sleep(self.0).await;
            Ok(())
        }
    }

    async fn running(cycle: Slow) -> (HotReloadCoordinator, JoinHandle<()>) {
        let (coordinator, handle) = HotReloadCoordinator::spawn(cycle, Duration::from_millis(10));
        let config = ReloadConfig::new(Vec::new(), BTreeMap::new(), false).unwrap();
        coordinator.trigger(config, ReloadTrigger::Startup);
        let mut state = coordinator.watch_state();
        state
            .wait_for(|s| *s == ReloadCycleState::Running)
            .await
            .unwrap();
        (coordinator, handle)
    }

    #[tokio::test]
    async fn waits_for_running_cycle() {
        let (coordinator, handle) = running(Slow(Duration::from_millis(100))).await;
        let mut outcomes = coordinator.subscribe();

        assert!(Shutdown::new(Duration::from_secs(5)).run(&coordinator, handle).await);
        assert!(outcomes.try_recv().unwrap().is_success());
    }

    #[tokio::test]
    async fn aborts_after_grace() {
        let (coordinator, handle) = running(Slow(Duration::from_secs(60))).await;
        assert!(!Shutdown::new(Duration::from_millis(50)).run(&coordinator, handle).await);
        assert!(coordinator.is_stopped());
    }
}
