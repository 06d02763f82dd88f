//! Semantic drift detection boundary.
//!
//! The scoring algorithm itself is external; this crate only consumes the
//! verdict. [`TermOverlapDetector`] is a cheap lexical stand-in used when no
//! richer detector is wired up.

use crate::model::DriftStatus;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Verdict produced by a drift detector for one trial output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftReport {
    pub status: DriftStatus,
    pub aligned: bool,
    pub confidence: f64,
}

impl DriftReport {
    pub fn aligned(confidence: f64) -> Self {
        Self {
            status: DriftStatus::Aligned,
            aligned: true,
            confidence,
        }
    }

    pub fn drifted(confidence: f64) -> Self {
        Self {
            status: DriftStatus::Drifted,
            aligned: false,
            confidence,
        }
    }

    /// The detector itself failed; the trial is not failed for this.
    pub fn analysis_error() -> Self {
        Self {
            status: DriftStatus::AnalysisError,
            aligned: false,
            confidence: 0.0,
        }
    }
}

#[async_trait]
pub trait DriftDetector: Send + Sync {
    async fn detect(
        &self,
        output: &str,
        expected_terms: &BTreeSet<String>,
        semantic_anchors: &[String],
    ) -> anyhow::Result<DriftReport>;
}

/// Lexical overlap detector: the share of expected terms and anchors that
/// literally appear in the output, case-insensitive.
#[derive(Debug, Clone)]
pub struct TermOverlapDetector {
    /// Overlap at or above this is considered aligned.
    pub threshold: f64,
}

impl Default for TermOverlapDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl TermOverlapDetector {
    pub fn new() -> Self {
        Self { threshold: 0.5 }
    }
}

#[async_trait]
impl DriftDetector for TermOverlapDetector {
    async fn detect(
        &self,
        output: &str,
        expected_terms: &BTreeSet<String>,
        semantic_anchors: &[String],
    ) -> anyhow::Result<DriftReport> {
        let haystack = output.to_lowercase();
        let needles: Vec<String> = expected_terms
            .iter()
            .map(String::as_str)
            .chain(semantic_anchors.iter().map(String::as_str))
            .map(str::to_lowercase)
            .collect();

        if needles.is_empty() {
            return Ok(DriftReport::aligned(1.0));
        }

        let hits = needles.iter().filter(|n| haystack.contains(*n)).count();
        let overlap = hits as f64 / needles.len() as f64;
        if overlap >= self.threshold {
            Ok(DriftReport::aligned(overlap))
        } else {
            Ok(DriftReport::drifted(overlap))
        }
    }
}
