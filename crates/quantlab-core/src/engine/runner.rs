//! Single-trial execution: validate, probe, execute under a timeout,
//! classify failures, and recover where the category allows it.
//!
//! `run_single_trial` never returns an error and never panics: every path
//! (validation failure, readiness failure, execution failure, recovery
//! failure) terminates in exactly one fully-formed [`TrialResult`].

use super::lock::EngineStateLock;
use super::readiness::ReadinessProbe;
use super::recovery::RecoveryCoordinator;
use super::{ChatMessage, CompletionRequest, CompletionResponse, InferenceEngine, ModelManager};
use crate::config::{RecoveryDelays, RunnerPolicy};
use crate::errors::{ErrorCategory, TrialError};
use crate::metrics;
use crate::model::{DriftStatus, ExecutionPhase, PromptSpec, TierId, TrialResult, TrialSpec};
use crate::progression::TierProgressionController;
use crate::providers::drift::{DriftDetector, DriftReport};
use crate::providers::signal::ControlSignals;
use crate::providers::sink::ResultSink;
use crate::providers::tokens::TokenCounter;
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout};
use uuid::Uuid;

pub struct TrialRunner {
    manager: Option<Arc<dyn ModelManager>>,
    lock: Arc<EngineStateLock>,
    probe: ReadinessProbe,
    recovery: RecoveryCoordinator,
    drift: Arc<dyn DriftDetector>,
    counter: Arc<dyn TokenCounter>,
    signals: Arc<dyn ControlSignals>,
    sink: Option<Arc<dyn ResultSink>>,
    progression: Option<Arc<TierProgressionController>>,
    policy: RunnerPolicy,
    run_id: Uuid,
}

impl TrialRunner {
    pub fn new(
        manager: Option<Arc<dyn ModelManager>>,
        drift: Arc<dyn DriftDetector>,
        counter: Arc<dyn TokenCounter>,
        signals: Arc<dyn ControlSignals>,
        policy: RunnerPolicy,
        delays: RecoveryDelays,
    ) -> Self {
        let lock = Arc::new(EngineStateLock::new());
        let probe = ReadinessProbe::new(policy.timeouts, policy.probe_max_tokens);
        let recovery =
            RecoveryCoordinator::new(lock.clone(), manager.clone(), probe.clone(), delays);
        Self {
            manager,
            lock,
            probe,
            recovery,
            drift,
            counter,
            signals,
            sink: None,
            progression: None,
            policy,
            run_id: Uuid::new_v4(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ResultSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_progression(mut self, progression: Arc<TierProgressionController>) -> Self {
        self.progression = Some(progression);
        self
    }

    pub fn engine_lock(&self) -> &Arc<EngineStateLock> {
        &self.lock
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Run one trial to a terminal state.
    ///
    /// Per-trial state machine: Validating -> ReadinessCheck -> Executing ->
    /// {Success | TimedOut | Failed}; a Failed with a recoverable category
    /// goes through Recovering -> {Recovered | Failed}. The recovery retry
    /// folds into this same result; it is never reported separately.
    pub async fn run_single_trial(
        &self,
        engine: Arc<dyn InferenceEngine>,
        spec: &TrialSpec,
        prompt: &PromptSpec,
        tier: TierId,
        trial_number: u32,
    ) -> TrialResult {
        // Validating: fail fast, no engine interaction.
        let issues = self.validate_request(spec, prompt, trial_number);
        if !issues.is_empty() {
            let result = self.validation_failure(spec, tier, trial_number, &issues);
            self.deliver(&result);
            return result;
        }

        // The first trial of a tier waits (best-effort) for the previous
        // tier's completion bookkeeping to settle.
        if trial_number == 1 {
            if let Some(progression) = &self.progression {
                progression.wait_for_transition_clear().await;
            }
        }

        // ReadinessCheck.
        let mut recovered = false;
        let mut engine = engine;
        let readiness = if trial_number == 1 {
            self.probe.verify_ready(engine.as_ref(), tier).await
        } else {
            let health = self.probe.health_check(engine.as_ref(), tier).await;
            if health.ready {
                health
            } else {
                self.probe.verify_ready(engine.as_ref(), tier).await
            }
        };
        if !readiness.ready {
            let detail = readiness.error.unwrap_or_else(|| "engine not ready".into());
            tracing::warn!(%tier, trial_number, detail, "engine failed readiness; attempting recovery");
            if self
                .recovery
                .recover(tier, ErrorCategory::EngineNotReady)
                .await
            {
                recovered = true;
                engine = self.active_engine(engine);
            } else {
                let result = self.failure_result(
                    spec,
                    tier,
                    trial_number,
                    ErrorCategory::EngineNotReady,
                    ExecutionPhase::EngineFailure,
                    &detail,
                    0,
                );
                self.deliver(&result);
                return result;
            }
        }

        // Executing.
        let started = Instant::now();
        let result = match self.execute_once(&engine, spec, prompt, tier).await {
            Ok(response) => {
                self.success_result(spec, tier, trial_number, &response, started, recovered)
                    .await
            }
            Err(err) => {
                let error = TrialError::from_anyhow(&err);
                let category = error.category();
                let latency_ms = started.elapsed().as_millis() as u64;
                if category.is_recoverable() {
                    self.recover_and_retry(engine, spec, prompt, tier, trial_number, error)
                        .await
                } else {
                    let phase = Self::terminal_phase(category);
                    self.failure_result(
                        spec,
                        tier,
                        trial_number,
                        category,
                        phase,
                        &error.to_string(),
                        latency_ms,
                    )
                }
            }
        };
        self.deliver(&result);
        result
    }

    /// Validation messages for a request; empty means valid. Tier
    /// membership and the completion capability are enforced by the type
    /// system and need no runtime check.
    pub fn validate_request(
        &self,
        spec: &TrialSpec,
        prompt: &PromptSpec,
        trial_number: u32,
    ) -> Vec<String> {
        let mut issues = Vec::new();
        if spec.test_id.trim().is_empty() {
            issues.push("test id must not be empty".to_string());
        }
        if spec.max_tokens == 0 {
            issues.push("max_tokens must be at least 1".to_string());
        }
        if prompt.text.trim().is_empty() {
            issues.push("prompt text must not be empty".to_string());
        }
        if trial_number == 0 {
            issues.push("trial number must be at least 1".to_string());
        } else if trial_number > self.policy.max_trials_per_run {
            issues.push(format!(
                "trial number {} exceeds the per-run ceiling of {}",
                trial_number, self.policy.max_trials_per_run
            ));
        }
        issues
    }

    /// One completion attempt: stop/pause checkpoint, the engine call raced
    /// against the tier's execution timeout under the shared lock, then a
    /// second checkpoint. A timer win surfaces as `TrialError::Timeout`.
    async fn execute_once(
        &self,
        engine: &Arc<dyn InferenceEngine>,
        spec: &TrialSpec,
        prompt: &PromptSpec,
        tier: TierId,
    ) -> anyhow::Result<CompletionResponse> {
        self.checkpoint().await?;

        let limit = self.policy.timeouts.execution.for_tier(tier);
        let request = CompletionRequest {
            messages: vec![ChatMessage::user(prompt.text.clone())],
            max_tokens: spec.max_tokens,
            temperature: self.policy.sampling.temperature,
            top_p: self.policy.sampling.top_p,
        };
        let engine = engine.clone();
        let response = self
            .lock
            .with_shared(move || async move {
                match timeout(limit, engine.create_completion(request)).await {
                    Ok(done) => done,
                    Err(_) => Err(TrialError::Timeout(format!(
                        "{}ms budget exceeded",
                        limit.as_millis()
                    ))
                    .into()),
                }
            })
            .await?;

        self.checkpoint().await?;
        Ok(response)
    }

    /// Cooperative cancellation point: stop wins immediately; pause waits
    /// in a bounded poll (the pause source is an external read-only flag,
    /// so there is no signal to subscribe to).
    async fn checkpoint(&self) -> Result<(), TrialError> {
        if self.signals.stop_requested() {
            return Err(TrialError::UserStopped);
        }
        let mut polls = 0u32;
        while self.signals.is_paused() {
            if polls >= self.policy.pause_poll_cap {
                tracing::warn!("pause wait exceeded its cap; proceeding");
                break;
            }
            polls += 1;
            sleep(self.policy.pause_poll_interval).await;
            if self.signals.stop_requested() {
                return Err(TrialError::UserStopped);
            }
        }
        Ok(())
    }

    /// Exactly one recovery attempt for a recoverable failure, then one
    /// retry of the completion. The retry never triggers further recovery.
    async fn recover_and_retry(
        &self,
        engine: Arc<dyn InferenceEngine>,
        spec: &TrialSpec,
        prompt: &PromptSpec,
        tier: TierId,
        trial_number: u32,
        error: TrialError,
    ) -> TrialResult {
        let category = error.category();
        tracing::warn!(
            %tier,
            trial_number,
            category = category.label(),
            error = %error,
            "recoverable trial failure; attempting engine recovery"
        );
        if !self.recovery.recover(tier, category).await {
            return self.failure_result(
                spec,
                tier,
                trial_number,
                category,
                ExecutionPhase::EngineFailure,
                &error.to_string(),
                0,
            );
        }

        let engine = self.active_engine(engine);
        let retry_started = Instant::now();
        match self.execute_once(&engine, spec, prompt, tier).await {
            Ok(response) => {
                self.success_result(spec, tier, trial_number, &response, retry_started, true)
                    .await
            }
            Err(retry_err) => {
                let retry_error = TrialError::from_anyhow(&retry_err);
                let retry_category = retry_error.category();
                self.failure_result(
                    spec,
                    tier,
                    trial_number,
                    retry_category,
                    Self::terminal_phase(retry_category),
                    &format!("retry after recovery failed: {}", retry_error),
                    retry_started.elapsed().as_millis() as u64,
                )
            }
        }
    }

    async fn success_result(
        &self,
        spec: &TrialSpec,
        tier: TierId,
        trial_number: u32,
        response: &CompletionResponse,
        started: Instant,
        recovered: bool,
    ) -> TrialResult {
        let latency_ms = started.elapsed().as_millis() as u64;
        let tokens = response
            .usage
            .as_ref()
            .and_then(|usage| usage.produced())
            .unwrap_or_else(|| self.counter.count(&response.content));

        let drift = match self
            .drift
            .detect(&response.content, &spec.expected_terms, &spec.semantic_anchors)
            .await
        {
            Ok(report) => report,
            Err(e) => {
                tracing::warn!(error = %e, "drift analysis failed; not failing the trial");
                DriftReport::analysis_error()
            }
        };

        let derived = metrics::derive(
            spec,
            &response.content,
            tokens,
            latency_ms,
            &drift,
            self.policy.timeouts.execution.for_tier(tier),
        );

        TrialResult {
            run_id: self.run_id,
            test_id: spec.test_id.clone(),
            tier,
            trial_number,
            tokens,
            latency_ms,
            completion: tokens > self.policy.min_completion_tokens,
            overflow: tokens > spec.max_tokens,
            drift: drift.status,
            execution_phase: if recovered {
                ExecutionPhase::Recovered
            } else {
                ExecutionPhase::Completed
            },
            error_category: None,
            notes: if recovered {
                "completed after engine recovery".into()
            } else {
                "ok".into()
            },
            timestamp: Utc::now(),
            metrics: Some(derived),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn failure_result(
        &self,
        spec: &TrialSpec,
        tier: TierId,
        trial_number: u32,
        category: ErrorCategory,
        phase: ExecutionPhase,
        detail: &str,
        latency_ms: u64,
    ) -> TrialResult {
        TrialResult {
            run_id: self.run_id,
            test_id: spec.test_id.clone(),
            tier,
            trial_number,
            tokens: 0,
            latency_ms,
            completion: false,
            overflow: false,
            drift: DriftStatus::Unknown,
            execution_phase: phase,
            error_category: Some(category),
            notes: format!("{}: {}; {}", category.label(), detail, category.guidance()),
            timestamp: Utc::now(),
            metrics: None,
        }
    }

    fn validation_failure(
        &self,
        spec: &TrialSpec,
        tier: TierId,
        trial_number: u32,
        issues: &[String],
    ) -> TrialResult {
        TrialResult {
            run_id: self.run_id,
            test_id: spec.test_id.clone(),
            tier,
            trial_number,
            tokens: 0,
            latency_ms: 0,
            completion: false,
            overflow: false,
            drift: DriftStatus::Unknown,
            execution_phase: ExecutionPhase::ValidationFailed,
            error_category: None,
            notes: format!("VALIDATION_FAILED: {}", issues.join("; ")),
            timestamp: Utc::now(),
            metrics: None,
        }
    }

    fn terminal_phase(category: ErrorCategory) -> ExecutionPhase {
        match category {
            ErrorCategory::Timeout => ExecutionPhase::Timeout,
            ErrorCategory::UserStopped => ExecutionPhase::UserStopped,
            ErrorCategory::MemoryDisposal | ErrorCategory::EngineNotReady => {
                ExecutionPhase::EngineFailure
            }
            ErrorCategory::CompletionApi | ErrorCategory::General => ExecutionPhase::Failed,
        }
    }

    /// After a recovery the manager owns the fresh handle; fall back to the
    /// caller-supplied one if nothing was installed.
    fn active_engine(&self, fallback: Arc<dyn InferenceEngine>) -> Arc<dyn InferenceEngine> {
        self.manager
            .as_ref()
            .and_then(|manager| manager.current_engine())
            .unwrap_or(fallback)
    }

    /// Hand the result to the sink and the progression tracker. Neither is
    /// allowed to fail the trial.
    fn deliver(&self, result: &TrialResult) {
        if let Some(sink) = &self.sink {
            if let Err(e) = sink.record(result) {
                tracing::warn!(error = %e, test_id = %result.test_id, "result sink rejected a trial result");
            }
        }
        if let Some(progression) = &self.progression {
            if let Err(e) = progression.preserve_trial_result(result.tier, result.clone()) {
                tracing::debug!(error = %e, tier = %result.tier, "result not preserved for progression");
            }
        }
    }
}
