//! Trial execution and recovery orchestration for quantized-model evaluation.
//!
//! The core loop runs single prompt/response trials against a swappable
//! inference engine serving one of several quantization tiers (Q1/Q4/Q8),
//! classifies failures, and repairs broken engines through a serialized
//! dispose-and-recreate protocol. Multi-tier test sequences are tracked by a
//! progression state machine that preserves per-tier results.
//!
//! Rendering, display throttling, drift scoring, and token counting live
//! outside this crate and are consumed through the traits in [`providers`]
//! and [`engine`].

pub mod config;
pub mod engine;
pub mod errors;
pub mod metrics;
pub mod model;
pub mod progression;
pub mod providers;

pub use config::{ProgressionPolicy, RecoveryDelays, RunnerPolicy, TrialTimeouts};
pub use engine::lock::EngineStateLock;
pub use engine::readiness::{Readiness, ReadinessProbe};
pub use engine::recovery::RecoveryCoordinator;
pub use engine::runner::TrialRunner;
pub use engine::{InferenceEngine, ModelManager};
pub use errors::{ErrorCategory, TrialError};
pub use model::{DriftStatus, ExecutionPhase, PromptSpec, TierId, TrialResult, TrialSpec};
pub use progression::{ProgressionError, TierProgressionController};
