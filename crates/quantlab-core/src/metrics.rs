//! Derived per-trial metrics.
//!
//! Computed only for trials that produced output; failures carry no
//! metrics block. Thresholds here are heuristics for dashboards, not
//! gates: nothing in this module fails a trial.

use crate::model::{DriftStatus, TrialSpec};
use crate::providers::drift::DriftReport;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EfficiencyClass {
    Efficient,
    Acceptable,
    Inefficient,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyClass {
    Safe,
    Caution,
    Unsafe,
}

/// Cross-checks between the token and latency dimensions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrossValidation {
    /// Tokens produced relative to the allowed budget. > 1.0 is overflow.
    pub token_budget_ratio: f64,
    /// Drift confidence discounted by how much of the tier's time budget
    /// the trial consumed. Zero when the output was not aligned.
    pub latency_alignment: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DerivedMetrics {
    /// Share of expected terms literally present in the output.
    pub semantic_fidelity: f64,
    pub efficiency: EfficiencyClass,
    pub safety: SafetyClass,
    /// Heuristic: within budget, reasonably fast, and on-topic.
    pub deployment_ready: bool,
    pub cross_validation: CrossValidation,
}

// Tokens-per-second boundaries for the efficiency classes.
const EFFICIENT_TPS: f64 = 20.0;
const ACCEPTABLE_TPS: f64 = 5.0;

pub fn semantic_fidelity(output: &str, expected_terms: &BTreeSet<String>) -> f64 {
    if expected_terms.is_empty() {
        return 1.0;
    }
    let haystack = output.to_lowercase();
    let hits = expected_terms
        .iter()
        .filter(|term| haystack.contains(&term.to_lowercase()))
        .count();
    hits as f64 / expected_terms.len() as f64
}

pub fn derive(
    spec: &TrialSpec,
    output: &str,
    tokens: u32,
    latency_ms: u64,
    drift: &DriftReport,
    execution_limit: Duration,
) -> DerivedMetrics {
    let fidelity = semantic_fidelity(output, &spec.expected_terms);

    let tps = if latency_ms == 0 {
        f64::from(tokens)
    } else {
        f64::from(tokens) * 1000.0 / latency_ms as f64
    };
    let efficiency = if tps >= EFFICIENT_TPS {
        EfficiencyClass::Efficient
    } else if tps >= ACCEPTABLE_TPS {
        EfficiencyClass::Acceptable
    } else {
        EfficiencyClass::Inefficient
    };

    let overflow = tokens > spec.max_tokens;
    let safety = if overflow {
        SafetyClass::Unsafe
    } else {
        match drift.status {
            DriftStatus::Aligned => SafetyClass::Safe,
            DriftStatus::Drifted | DriftStatus::AnalysisError | DriftStatus::Unknown => {
                SafetyClass::Caution
            }
        }
    };

    let limit_ms = execution_limit.as_millis().max(1) as f64;
    let budget_used = (latency_ms as f64 / limit_ms).min(1.0);
    let latency_alignment = if drift.aligned {
        (drift.confidence * (1.0 - budget_used)).clamp(0.0, 1.0)
    } else {
        0.0
    };

    let deployment_ready =
        !overflow && tokens > 0 && budget_used <= 0.5 && fidelity >= 0.5;

    DerivedMetrics {
        semantic_fidelity: fidelity,
        efficiency,
        safety,
        deployment_ready,
        cross_validation: CrossValidation {
            token_budget_ratio: f64::from(tokens) / f64::from(spec.max_tokens.max(1)),
            latency_alignment,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TrialSpec;

    fn spec() -> TrialSpec {
        TrialSpec::new("T1", 100).with_expected_terms(["paris", "france"])
    }

    #[test]
    fn fidelity_counts_matching_terms() {
        let s = spec();
        assert!((semantic_fidelity("Paris is in France", &s.expected_terms) - 1.0).abs() < 1e-9);
        assert!((semantic_fidelity("Paris only", &s.expected_terms) - 0.5).abs() < 1e-9);
        assert!((semantic_fidelity("nothing", &s.expected_terms)).abs() < 1e-9);
    }

    #[test]
    fn fast_aligned_trial_is_deployment_ready() {
        let m = derive(
            &spec(),
            "Paris, France",
            60,
            2_000,
            &DriftReport::aligned(0.9),
            Duration::from_secs(45),
        );
        assert_eq!(m.efficiency, EfficiencyClass::Efficient);
        assert_eq!(m.safety, SafetyClass::Safe);
        assert!(m.deployment_ready);
        assert!((m.cross_validation.token_budget_ratio - 0.6).abs() < 1e-9);
        assert!(m.cross_validation.latency_alignment > 0.8);
    }

    #[test]
    fn overflow_is_unsafe_and_not_deployable() {
        let m = derive(
            &spec(),
            "Paris, France",
            150,
            2_000,
            &DriftReport::aligned(0.9),
            Duration::from_secs(45),
        );
        assert_eq!(m.safety, SafetyClass::Unsafe);
        assert!(!m.deployment_ready);
        assert!(m.cross_validation.token_budget_ratio > 1.0);
    }

    #[test]
    fn drifted_output_scores_zero_alignment() {
        let m = derive(
            &spec(),
            "off topic",
            20,
            40_000,
            &DriftReport::drifted(0.2),
            Duration::from_secs(45),
        );
        assert_eq!(m.safety, SafetyClass::Caution);
        assert_eq!(m.efficiency, EfficiencyClass::Inefficient);
        assert!((m.cross_validation.latency_alignment).abs() < 1e-9);
        assert!(!m.deployment_ready);
    }
}
