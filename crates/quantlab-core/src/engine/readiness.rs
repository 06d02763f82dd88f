//! Minimal-completion probes that establish an engine is responsive.

use super::{ChatMessage, CompletionRequest, InferenceEngine};
use crate::config::TrialTimeouts;
use crate::model::TierId;
use std::time::Duration;
use tokio::time::timeout;

const READY_PROMPT: &str = "Reply with the single word: ready";
const RECOVERY_PROMPT: &str = "Recovery check. Reply with the single word: ready";

/// Outcome of a probe. Probes never error; failures fold into this value.
#[derive(Debug, Clone)]
pub struct Readiness {
    pub ready: bool,
    pub error: Option<String>,
}

impl Readiness {
    fn ok() -> Self {
        Self {
            ready: true,
            error: None,
        }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            ready: false,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReadinessProbe {
    timeouts: TrialTimeouts,
    probe_max_tokens: u32,
}

impl ReadinessProbe {
    pub fn new(timeouts: TrialTimeouts, probe_max_tokens: u32) -> Self {
        Self {
            timeouts,
            probe_max_tokens,
        }
    }

    /// Full readiness check before the first trial of a run. Tier-scaled
    /// timeout; ready iff a non-empty response arrives in time.
    pub async fn verify_ready(&self, engine: &dyn InferenceEngine, tier: TierId) -> Readiness {
        self.probe(
            engine,
            READY_PROMPT,
            self.timeouts.readiness.for_tier(tier),
            "readiness",
        )
        .await
    }

    /// Lighter check used once a run is underway.
    pub async fn health_check(&self, engine: &dyn InferenceEngine, tier: TierId) -> Readiness {
        self.probe(
            engine,
            READY_PROMPT,
            self.timeouts.health.for_tier(tier),
            "health",
        )
        .await
    }

    /// Post-recovery verification of a freshly recreated engine.
    pub async fn verify_recovered(&self, engine: &dyn InferenceEngine, tier: TierId) -> Readiness {
        self.probe(
            engine,
            RECOVERY_PROMPT,
            self.timeouts.readiness.for_tier(tier),
            "recovery",
        )
        .await
    }

    async fn probe(
        &self,
        engine: &dyn InferenceEngine,
        prompt: &str,
        limit: Duration,
        kind: &str,
    ) -> Readiness {
        let request = CompletionRequest {
            messages: vec![ChatMessage::user(prompt)],
            max_tokens: self.probe_max_tokens,
            temperature: 0.0,
            top_p: 1.0,
        };
        match timeout(limit, engine.create_completion(request)).await {
            Ok(Ok(response)) if !response.content.trim().is_empty() => Readiness::ok(),
            Ok(Ok(_)) => Readiness::failed(format!("{} probe returned empty content", kind)),
            Ok(Err(e)) => Readiness::failed(format!("{} probe failed: {:#}", kind, e)),
            Err(_) => Readiness::failed(format!(
                "{} probe timed out after {}ms",
                kind,
                limit.as_millis()
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::fake::FakeEngine;
    use crate::engine::CompletionResponse;
    use crate::errors::TrialError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    fn probe() -> ReadinessProbe {
        ReadinessProbe::new(TrialTimeouts::default(), 8)
    }

    /// Records the request it is sent; always answers "ready".
    #[derive(Default)]
    struct RecordingEngine {
        seen_max_tokens: Mutex<Option<u32>>,
    }

    #[async_trait]
    impl InferenceEngine for RecordingEngine {
        async fn create_completion(
            &self,
            request: CompletionRequest,
        ) -> anyhow::Result<CompletionResponse> {
            *self.seen_max_tokens.lock().unwrap() = Some(request.max_tokens);
            Ok(CompletionResponse {
                content: "ready".into(),
                usage: None,
            })
        }

        async fn dispose(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn responsive_engine_is_ready() {
        let engine = FakeEngine::replying("ready", 1);
        let readiness = probe().verify_ready(&engine, TierId::Q1).await;
        assert!(readiness.ready);
        assert!(readiness.error.is_none());
    }

    #[tokio::test]
    async fn failing_engine_is_reported_not_thrown() {
        let engine = FakeEngine::failing(TrialError::EngineNotReady("loading".into()));
        let readiness = probe().verify_ready(&engine, TierId::Q4).await;
        assert!(!readiness.ready);
        assert!(readiness.error.unwrap().contains("readiness probe failed"));
    }

    #[tokio::test]
    async fn empty_content_is_not_ready() {
        let engine = FakeEngine::replying("   ", 0);
        let readiness = probe().health_check(&engine, TierId::Q1).await;
        assert!(!readiness.ready);
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_engine_times_out_at_tier_budget() {
        let engine = FakeEngine::hanging();
        let readiness = probe().verify_ready(&engine, TierId::Q8).await;
        assert!(!readiness.ready);
        assert!(readiness.error.unwrap().contains("30000ms"));
    }

    #[tokio::test]
    async fn probe_requests_use_the_configured_token_budget() {
        let probe = ReadinessProbe::new(TrialTimeouts::default(), 1);
        let engine = RecordingEngine::default();
        let readiness = probe.verify_ready(&engine, TierId::Q1).await;
        assert!(readiness.ready);
        assert_eq!(*engine.seen_max_tokens.lock().unwrap(), Some(1));
    }
}
