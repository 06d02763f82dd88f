//! Dispose-and-recreate protocol for a broken engine.
//!
//! The entire protocol runs under the exclusive side of
//! [`EngineStateLock`], so recovery attempts never overlap. A failed
//! recovery returns `false` and leaves the terminal outcome to the caller;
//! the coordinator itself never retries and never errors across its
//! boundary.

use super::lock::EngineStateLock;
use super::readiness::ReadinessProbe;
use super::ModelManager;
use crate::config::RecoveryDelays;
use crate::errors::ErrorCategory;
use crate::model::TierId;
use std::sync::Arc;
use tokio::time::sleep;

pub struct RecoveryCoordinator {
    lock: Arc<EngineStateLock>,
    manager: Option<Arc<dyn ModelManager>>,
    probe: ReadinessProbe,
    delays: RecoveryDelays,
}

impl RecoveryCoordinator {
    pub fn new(
        lock: Arc<EngineStateLock>,
        manager: Option<Arc<dyn ModelManager>>,
        probe: ReadinessProbe,
        delays: RecoveryDelays,
    ) -> Self {
        Self {
            lock,
            manager,
            probe,
            delays,
        }
    }

    /// Attempt one recovery for `tier`. Returns true iff a fresh engine was
    /// recreated, verified, and installed as the active handle.
    pub async fn recover(&self, tier: TierId, category: ErrorCategory) -> bool {
        self.lock
            .with_lock(|| self.recover_locked(tier, category))
            .await
    }

    async fn recover_locked(&self, tier: TierId, category: ErrorCategory) -> bool {
        let Some(manager) = self.manager.as_ref() else {
            tracing::warn!(%tier, "recovery requested but no model manager is wired up");
            return false;
        };
        tracing::info!(%tier, category = category.label(), "starting engine recovery");

        if let Some(current) = manager.current_engine() {
            if let Err(e) = current.dispose().await {
                tracing::warn!(%tier, error = %e, "failed to dispose broken engine");
                return false;
            }
            // Give the backend time to actually release engine-held memory.
            sleep(self.delays.settle).await;
        }

        let engine = match manager.force_recreate_engine(tier).await {
            Ok(engine) => engine,
            Err(e) => {
                tracing::warn!(%tier, error = %e, "engine recreation failed");
                return false;
            }
        };
        sleep(self.delays.stabilize).await;

        let readiness = self.probe.verify_recovered(engine.as_ref(), tier).await;
        if !readiness.ready {
            tracing::warn!(
                %tier,
                error = readiness.error.as_deref().unwrap_or("unknown"),
                "recreated engine failed readiness verification"
            );
            return false;
        }

        manager.install_engine(engine);
        tracing::info!(%tier, "engine recovery complete");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrialTimeouts;
    use crate::engine::fake::{FakeEngine, FakeModelManager};
    use crate::errors::TrialError;
    use tokio::task::yield_now;

    fn coordinator(
        manager: Option<Arc<dyn ModelManager>>,
        delays: RecoveryDelays,
    ) -> (Arc<EngineStateLock>, RecoveryCoordinator) {
        let lock = Arc::new(EngineStateLock::new());
        let probe = ReadinessProbe::new(TrialTimeouts::default(), 8);
        let coord = RecoveryCoordinator::new(lock.clone(), manager, probe, delays);
        (lock, coord)
    }

    #[tokio::test]
    async fn recovery_replaces_and_installs_a_verified_engine() {
        let broken: Arc<FakeEngine> = Arc::new(FakeEngine::failing(TrialError::MemoryDisposal(
            "gone".into(),
        )));
        let manager = Arc::new(FakeModelManager::new(Some(broken.clone())));
        let (_, coord) = coordinator(Some(manager.clone()), RecoveryDelays::zero());

        assert!(
            coord
                .recover(TierId::Q4, ErrorCategory::MemoryDisposal)
                .await
        );
        assert!(broken.is_disposed());
        assert_eq!(manager.recreate_calls(), 1);
        // The fresh engine answers where the broken one could not.
        let active = manager.current_engine().expect("engine installed");
        let probe = ReadinessProbe::new(TrialTimeouts::default(), 8);
        assert!(probe.verify_ready(active.as_ref(), TierId::Q4).await.ready);
    }

    #[tokio::test]
    async fn missing_manager_fails_immediately() {
        let (_, coord) = coordinator(None, RecoveryDelays::zero());
        assert!(
            !coord
                .recover(TierId::Q1, ErrorCategory::EngineNotReady)
                .await
        );
    }

    #[tokio::test]
    async fn recreate_failure_aborts_the_protocol() {
        let manager = Arc::new(FakeModelManager::new(None).fail_recreate());
        let (_, coord) = coordinator(Some(manager.clone()), RecoveryDelays::zero());
        assert!(
            !coord
                .recover(TierId::Q8, ErrorCategory::MemoryDisposal)
                .await
        );
        assert_eq!(manager.recreate_calls(), 1);
        assert!(manager.current_engine().is_none());
    }

    #[tokio::test]
    async fn unready_replacement_is_not_installed() {
        let manager = Arc::new(
            FakeModelManager::new(None).with_replacement(Arc::new(FakeEngine::replying("", 0))),
        );
        let (_, coord) = coordinator(Some(manager.clone()), RecoveryDelays::zero());
        assert!(
            !coord
                .recover(TierId::Q1, ErrorCategory::EngineNotReady)
                .await
        );
        assert!(manager.current_engine().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_recoveries_are_serialized() {
        let broken: Arc<FakeEngine> = Arc::new(FakeEngine::failing(TrialError::MemoryDisposal(
            "gone".into(),
        )));
        let manager = Arc::new(FakeModelManager::new(Some(broken)));
        let (lock, coord) = coordinator(Some(manager.clone()), RecoveryDelays::default());
        let coord = Arc::new(coord);

        let first = {
            let coord = coord.clone();
            tokio::spawn(async move { coord.recover(TierId::Q4, ErrorCategory::MemoryDisposal).await })
        };
        // First recovery reaches its settle sleep while holding the lock.
        yield_now().await;
        assert!(lock.is_locked());

        let second = {
            let coord = coord.clone();
            tokio::spawn(async move { coord.recover(TierId::Q4, ErrorCategory::EngineNotReady).await })
        };
        yield_now().await;
        // The second attempt is queued, not running.
        assert_eq!(lock.queue_length(), 1);

        assert!(first.await.unwrap());
        assert!(second.await.unwrap());
        assert_eq!(manager.recreate_calls(), 2);
        assert_eq!(lock.queue_length(), 0);
    }
}
