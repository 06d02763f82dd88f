//! Engine boundary: the completion capability, the model manager that owns
//! the active engine handle, and the orchestration built on top of them.

pub mod fake;
pub mod lock;
pub mod readiness;
pub mod recovery;
pub mod runner;

use crate::model::TierId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
}

/// Usage metadata as engines report it; any field may be missing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
}

impl TokenUsage {
    pub fn total(total_tokens: u32) -> Self {
        Self {
            total_tokens: Some(total_tokens),
            ..Self::default()
        }
    }

    /// Tokens attributed to the trial: totals when present, otherwise the
    /// completion-side count.
    pub fn produced(&self) -> Option<u32> {
        self.total_tokens.or(self.completion_tokens)
    }
}

#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
    pub usage: Option<TokenUsage>,
}

/// The one capability an engine exposes, plus teardown. Calls may fail or
/// hang; callers bound every call with a timer.
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    async fn create_completion(
        &self,
        request: CompletionRequest,
    ) -> anyhow::Result<CompletionResponse>;

    /// Release engine-held resources. Used by the recovery protocol.
    async fn dispose(&self) -> anyhow::Result<()>;
}

/// Owner of the active engine handle. Recovery goes through here to swap a
/// broken engine for a fresh one.
#[async_trait]
pub trait ModelManager: Send + Sync {
    fn current_engine(&self) -> Option<Arc<dyn InferenceEngine>>;

    fn install_engine(&self, engine: Arc<dyn InferenceEngine>);

    async fn force_recreate_engine(&self, tier: TierId)
        -> anyhow::Result<Arc<dyn InferenceEngine>>;
}
