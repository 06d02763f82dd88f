//! Progressive multi-tier execution state machine.
//!
//! One logical test can run across several quantization tiers in sequence.
//! The controller tracks which tiers are pending/completed, preserves
//! per-tier results, and gates the hand-off between tiers so a new tier's
//! first trial does not race the previous tier's completion bookkeeping.
//!
//! The controller is an explicit, constructor-injected object: it knows the
//! identity of the one test that runs progressively and ignores
//! `initialize` calls for anything else.

use crate::config::ProgressionPolicy;
use crate::model::{TierId, TrialResult};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;
use tokio::sync::watch;
use tokio::time::timeout;

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ProgressionError {
    #[error("progression controller is inactive")]
    Inactive,
    #[error("tier {0} is not part of this progressive run")]
    UnknownTier(TierId),
    #[error("tier {0} is already completed; its results are frozen")]
    TierCompleted(TierId),
    #[error("tier {tier} cannot complete while {current} is current")]
    NotCurrent { tier: TierId, current: TierId },
    #[error("trial number {got} for tier {tier} does not advance past {last}")]
    NonMonotonicTrial { tier: TierId, got: u32, last: u32 },
}

#[derive(Debug, Default)]
struct ProgressState {
    active: bool,
    test_id: String,
    current: Option<TierId>,
    completed: Vec<TierId>,
    pending: VecDeque<TierId>,
    preserved: BTreeMap<TierId, Vec<TrialResult>>,
    last_completion: Option<DateTime<Utc>>,
}

pub struct TierProgressionController {
    progressive_test_id: String,
    policy: ProgressionPolicy,
    state: Mutex<ProgressState>,
    blocked: watch::Sender<bool>,
}

impl TierProgressionController {
    pub fn new(progressive_test_id: impl Into<String>, policy: ProgressionPolicy) -> Self {
        let (blocked, _) = watch::channel(false);
        Self {
            progressive_test_id: progressive_test_id.into(),
            policy,
            state: Mutex::new(ProgressState::default()),
            blocked,
        }
    }

    /// Reset and seed the controller for a progressive run. A `test_id`
    /// that does not match the tracked identity deactivates the controller;
    /// every later operation is then a [`ProgressionError::Inactive`] no-op.
    pub fn initialize(&self, test_id: &str, tiers: &[TierId]) {
        let mut state = self.lock_state();
        *state = ProgressState::default();
        if test_id != self.progressive_test_id {
            tracing::debug!(
                test_id,
                tracked = %self.progressive_test_id,
                "test is not the progressive sequence; controller inactive"
            );
            self.blocked.send_replace(false);
            return;
        }

        let mut seeded: Vec<TierId> = tiers.to_vec();
        seeded.sort_by_key(|t| t.rank());
        seeded.dedup();

        state.active = true;
        state.test_id = test_id.to_string();
        state.pending = seeded.into_iter().collect();
        self.blocked.send_replace(false);
    }

    /// Mark `tier` as the one now executing and block the transition gate.
    pub fn start_tier_execution(&self, tier: TierId) -> Result<(), ProgressionError> {
        let mut state = self.lock_state();
        if !state.active {
            return Err(ProgressionError::Inactive);
        }
        if state.completed.contains(&tier) {
            return Err(ProgressionError::TierCompleted(tier));
        }
        if !state.pending.contains(&tier) {
            return Err(ProgressionError::UnknownTier(tier));
        }
        state.current = Some(tier);
        self.blocked.send_replace(true);
        tracing::info!(%tier, "tier execution started");
        Ok(())
    }

    /// Mark `tier` completed: move it out of pending (idempotently, no
    /// duplicate completion entries), freeze its preserved results with the
    /// supplied snapshot, and schedule the transition gate to clear after
    /// the grace delay.
    pub fn complete_tier_execution(
        &self,
        tier: TierId,
        results: &[TrialResult],
    ) -> Result<(), ProgressionError> {
        let mut state = self.lock_state();
        if !state.active {
            return Err(ProgressionError::Inactive);
        }
        if state.completed.contains(&tier) {
            // Idempotent: completing twice neither duplicates nor rewrites.
            return Ok(());
        }
        match state.current {
            Some(current) if current != tier => {
                return Err(ProgressionError::NotCurrent { tier, current });
            }
            // A pending tier may complete without an explicit start; it is
            // treated as implicitly current.
            None if !state.pending.contains(&tier) => {
                return Err(ProgressionError::UnknownTier(tier));
            }
            _ => {}
        }

        state.pending.retain(|t| *t != tier);
        state.completed.push(tier);
        state.current = None;
        // The supplied snapshot is the frozen record, even when it is empty;
        // it replaces anything accumulated via preserve_trial_result.
        state.preserved.insert(tier, results.to_vec());
        state.last_completion = Some(Utc::now());
        tracing::info!(
            %tier,
            preserved = results.len(),
            remaining = state.pending.len(),
            "tier execution completed"
        );

        let tx = self.blocked.clone();
        let grace = self.policy.transition_grace;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    tokio::time::sleep(grace).await;
                    tx.send_replace(false);
                });
            }
            // No runtime to schedule the grace delay on: clear the gate
            // right away rather than leaving it shut forever.
            Err(_) => {
                tracing::debug!("no async runtime; clearing transition gate immediately");
                tx.send_replace(false);
            }
        }
        Ok(())
    }

    /// Append one in-progress result for a current or pending tier. Trial
    /// numbers must strictly increase within the tier.
    pub fn preserve_trial_result(
        &self,
        tier: TierId,
        result: TrialResult,
    ) -> Result<(), ProgressionError> {
        let mut state = self.lock_state();
        if !state.active {
            return Err(ProgressionError::Inactive);
        }
        if state.completed.contains(&tier) {
            return Err(ProgressionError::TierCompleted(tier));
        }
        if state.current != Some(tier) && !state.pending.contains(&tier) {
            return Err(ProgressionError::UnknownTier(tier));
        }
        let entry = state.preserved.entry(tier).or_default();
        if let Some(last) = entry.last() {
            if result.trial_number <= last.trial_number {
                return Err(ProgressionError::NonMonotonicTrial {
                    tier,
                    got: result.trial_number,
                    last: last.trial_number,
                });
            }
        }
        entry.push(result);
        Ok(())
    }

    /// True once every seeded tier has completed.
    pub fn is_execution_complete(&self) -> bool {
        let state = self.lock_state();
        state.active && state.pending.is_empty() && !state.completed.is_empty()
    }

    pub fn current_tier(&self) -> Option<TierId> {
        self.lock_state().current
    }

    pub fn completed_tiers(&self) -> Vec<TierId> {
        self.lock_state().completed.clone()
    }

    pub fn pending_tiers(&self) -> Vec<TierId> {
        self.lock_state().pending.iter().copied().collect()
    }

    pub fn last_tier_completion(&self) -> Option<DateTime<Utc>> {
        self.lock_state().last_completion
    }

    pub fn is_transition_blocked(&self) -> bool {
        *self.blocked.borrow()
    }

    /// Read-only view of preserved results, restricted to completed tiers.
    pub fn get_preserved_results(&self) -> BTreeMap<TierId, Vec<TrialResult>> {
        let state = self.lock_state();
        state
            .preserved
            .iter()
            .filter(|(tier, _)| state.completed.contains(tier))
            .map(|(tier, results)| (*tier, results.clone()))
            .collect()
    }

    /// JSON export of the completed portion of the run.
    pub fn export_preserved_results(&self) -> serde_json::Value {
        let state = self.lock_state();
        let results: BTreeMap<&TierId, &Vec<TrialResult>> = state
            .preserved
            .iter()
            .filter(|(tier, _)| state.completed.contains(tier))
            .collect();
        serde_json::json!({
            "test_id": state.test_id,
            "completed_tiers": state.completed,
            "pending_tiers": state.pending,
            "last_completion": state.last_completion,
            "results": results,
        })
    }

    /// Back to inactive and empty.
    pub fn reset(&self) {
        *self.lock_state() = ProgressState::default();
        self.blocked.send_replace(false);
    }

    /// Wait for the transition gate to clear, bounded by the policy cap.
    /// Returns false when the cap expired and the caller should proceed
    /// best-effort anyway.
    pub async fn wait_for_transition_clear(&self) -> bool {
        let mut rx = self.blocked.subscribe();
        if !*rx.borrow_and_update() {
            return true;
        }
        let cleared = matches!(
            timeout(
                self.policy.transition_wait_cap,
                rx.wait_for(|blocked| !blocked),
            )
            .await,
            Ok(Ok(_))
        );
        if !cleared {
            tracing::warn!("tier transition still blocked after wait cap; proceeding");
        }
        cleared
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, ProgressState> {
        self.state.lock().expect("progression state poisoned")
    }
}
