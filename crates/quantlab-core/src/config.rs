//! Timeout, delay, and sampling policy for trial execution.
//!
//! Every wall-clock constant the orchestrator uses lives here so callers
//! (and tests) can override them; the defaults are the production values.

use crate::model::TierId;
use std::time::Duration;

/// A duration that scales with the quantization tier.
///
/// Lower tiers answer faster, so probes and trials get tighter budgets.
#[derive(Debug, Clone, Copy)]
pub struct TierScaled {
    pub q1: Duration,
    pub q4: Duration,
    pub q8: Duration,
}

impl TierScaled {
    pub const fn secs(q1: u64, q4: u64, q8: u64) -> Self {
        Self {
            q1: Duration::from_secs(q1),
            q4: Duration::from_secs(q4),
            q8: Duration::from_secs(q8),
        }
    }

    pub const fn uniform(d: Duration) -> Self {
        Self { q1: d, q4: d, q8: d }
    }

    pub fn for_tier(&self, tier: TierId) -> Duration {
        match tier {
            TierId::Q1 => self.q1,
            TierId::Q4 => self.q4,
            TierId::Q8 => self.q8,
        }
    }
}

/// Tier-scaled timeouts for the three kinds of engine calls.
#[derive(Debug, Clone, Copy)]
pub struct TrialTimeouts {
    /// Full readiness probe before the first trial of a run.
    pub readiness: TierScaled,
    /// Lighter health probe used on subsequent trials.
    pub health: TierScaled,
    /// The real completion request.
    pub execution: TierScaled,
}

impl Default for TrialTimeouts {
    fn default() -> Self {
        Self {
            readiness: TierScaled::secs(15, 20, 30),
            health: TierScaled::secs(4, 6, 8),
            execution: TierScaled::secs(45, 60, 90),
        }
    }
}

/// Fixed waits inside the dispose-and-recreate protocol.
#[derive(Debug, Clone, Copy)]
pub struct RecoveryDelays {
    /// Wait after disposing the old engine, so held resources are released.
    pub settle: Duration,
    /// Wait after recreation before probing the replacement.
    pub stabilize: Duration,
}

impl Default for RecoveryDelays {
    fn default() -> Self {
        Self {
            settle: Duration::from_secs(3),
            stabilize: Duration::from_secs(5),
        }
    }
}

impl RecoveryDelays {
    /// No waits at all. Test-only in spirit, but harmless elsewhere.
    pub const fn zero() -> Self {
        Self {
            settle: Duration::ZERO,
            stabilize: Duration::ZERO,
        }
    }
}

/// Fixed sampling parameters for the real completion request.
#[derive(Debug, Clone, Copy)]
pub struct SamplingParams {
    pub temperature: f32,
    pub top_p: f32,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.9,
        }
    }
}

/// Policy knobs for [`crate::TrialRunner`].
#[derive(Debug, Clone)]
pub struct RunnerPolicy {
    pub timeouts: TrialTimeouts,
    pub sampling: SamplingParams,
    /// Sanity ceiling on trial numbers within one run.
    pub max_trials_per_run: u32,
    /// A trial counts as a completion only above this many tokens.
    pub min_completion_tokens: u32,
    /// Token budget for readiness/health probes.
    pub probe_max_tokens: u32,
    /// Poll step while the pause flag is set.
    pub pause_poll_interval: Duration,
    /// Pause polls before giving up and proceeding.
    pub pause_poll_cap: u32,
}

impl Default for RunnerPolicy {
    fn default() -> Self {
        Self {
            timeouts: TrialTimeouts::default(),
            sampling: SamplingParams::default(),
            max_trials_per_run: 50,
            min_completion_tokens: 15,
            probe_max_tokens: 8,
            pause_poll_interval: Duration::from_millis(250),
            pause_poll_cap: 240,
        }
    }
}

/// Policy knobs for [`crate::TierProgressionController`].
#[derive(Debug, Clone, Copy)]
pub struct ProgressionPolicy {
    /// Delay before the transition block clears after a tier completes, so
    /// the next tier's first trial does not race the completion bookkeeping.
    pub transition_grace: Duration,
    /// Longest a caller will wait for the block to clear before proceeding.
    pub transition_wait_cap: Duration,
}

impl Default for ProgressionPolicy {
    fn default() -> Self {
        Self {
            transition_grace: Duration::from_millis(500),
            transition_wait_cap: Duration::from_secs(5),
        }
    }
}
