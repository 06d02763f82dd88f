//! Core data model: trial requests, tiers, and the result row every
//! terminal trial attempt produces.

use crate::errors::ErrorCategory;
use crate::metrics::DerivedMetrics;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Quantization tier of the served model. Ordered by fidelity: Q1 < Q4 < Q8.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum TierId {
    Q1,
    Q4,
    Q8,
}

impl TierId {
    pub const ALL: [TierId; 3] = [TierId::Q1, TierId::Q4, TierId::Q8];

    /// Numeric rank used for FIFO seeding of pending tiers.
    pub fn rank(self) -> u8 {
        match self {
            TierId::Q1 => 1,
            TierId::Q4 => 4,
            TierId::Q8 => 8,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TierId::Q1 => "Q1",
            TierId::Q4 => "Q4",
            TierId::Q8 => "Q8",
        }
    }
}

impl fmt::Display for TierId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TierId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "Q1" => Ok(TierId::Q1),
            "Q4" => Ok(TierId::Q4),
            "Q8" => Ok(TierId::Q8),
            other => Err(format!("unknown tier: {}", other)),
        }
    }
}

/// What one trial is asked to do. Immutable for the duration of the trial.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrialSpec {
    pub test_id: String,
    pub max_tokens: u32,
    /// Terms the output is expected to mention; drives semantic fidelity.
    pub expected_terms: BTreeSet<String>,
    /// Ordered anchor phrases handed to the drift detector.
    pub semantic_anchors: Vec<String>,
}

impl TrialSpec {
    pub fn new(test_id: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            test_id: test_id.into(),
            max_tokens,
            expected_terms: BTreeSet::new(),
            semantic_anchors: Vec::new(),
        }
    }

    pub fn with_expected_terms<I, S>(mut self, terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.expected_terms = terms.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_anchors<I, S>(mut self, anchors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.semantic_anchors = anchors.into_iter().map(Into::into).collect();
        self
    }
}

/// The prompt for one trial.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptSpec {
    pub text: String,
}

impl PromptSpec {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// Where a trial ended up. `Recovered` and `EngineFailure` let downstream
/// consumers tell a repaired trial from an abandoned one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPhase {
    Completed,
    Recovered,
    EngineFailure,
    Timeout,
    UserStopped,
    ValidationFailed,
    Failed,
}

impl ExecutionPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionPhase::Completed => "completed",
            ExecutionPhase::Recovered => "recovered",
            ExecutionPhase::EngineFailure => "engine_failure",
            ExecutionPhase::Timeout => "timeout",
            ExecutionPhase::UserStopped => "user_stopped",
            ExecutionPhase::ValidationFailed => "validation_failed",
            ExecutionPhase::Failed => "failed",
        }
    }
}

/// Alignment verdict attached to a result. `AnalysisError` means the drift
/// detector itself failed; that never fails the trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftStatus {
    Aligned,
    Drifted,
    AnalysisError,
    Unknown,
}

/// One row per terminal trial attempt. An internal recovery retry folds into
/// the same row; it is never reported separately.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrialResult {
    pub run_id: uuid::Uuid,
    pub test_id: String,
    pub tier: TierId,
    pub trial_number: u32,
    pub tokens: u32,
    pub latency_ms: u64,
    pub completion: bool,
    pub overflow: bool,
    pub drift: DriftStatus,
    pub execution_phase: ExecutionPhase,
    pub error_category: Option<ErrorCategory>,
    pub notes: String,
    pub timestamp: DateTime<Utc>,
    pub metrics: Option<DerivedMetrics>,
}

impl TrialResult {
    pub fn is_failure(&self) -> bool {
        !matches!(
            self.execution_phase,
            ExecutionPhase::Completed | ExecutionPhase::Recovered
        )
    }
}
