//! Scripted engine and manager used by tests and demos.

use super::{
    CompletionRequest, CompletionResponse, InferenceEngine, ModelManager, TokenUsage,
};
use crate::errors::TrialError;
use crate::model::TierId;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// One scripted reaction to a completion call.
#[derive(Debug, Clone)]
pub enum FakeBehavior {
    Reply {
        content: String,
        usage: Option<TokenUsage>,
    },
    Fail(TrialError),
    /// Never resolves; only a caller-side timeout gets past this.
    Hang,
}

/// Engine that plays back a queue of [`FakeBehavior`]s, then repeats a
/// fallback. Tracks call and dispose counts.
pub struct FakeEngine {
    script: Mutex<VecDeque<FakeBehavior>>,
    fallback: FakeBehavior,
    calls: AtomicUsize,
    disposed: AtomicBool,
}

impl FakeEngine {
    pub fn with_fallback(fallback: FakeBehavior) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback,
            calls: AtomicUsize::new(0),
            disposed: AtomicBool::new(false),
        }
    }

    /// Engine that always replies with `content` and a total-token count.
    pub fn replying(content: impl Into<String>, total_tokens: u32) -> Self {
        Self::with_fallback(FakeBehavior::Reply {
            content: content.into(),
            usage: Some(TokenUsage::total(total_tokens)),
        })
    }

    /// Engine that always fails with the given typed error.
    pub fn failing(error: TrialError) -> Self {
        Self::with_fallback(FakeBehavior::Fail(error))
    }

    /// Engine that never answers.
    pub fn hanging() -> Self {
        Self::with_fallback(FakeBehavior::Hang)
    }

    /// Queue a one-shot behavior ahead of the fallback.
    pub fn push(self, behavior: FakeBehavior) -> Self {
        self.script.lock().unwrap().push_back(behavior);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn next_behavior(&self) -> FakeBehavior {
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

#[async_trait]
impl InferenceEngine for FakeEngine {
    async fn create_completion(
        &self,
        _request: CompletionRequest,
    ) -> anyhow::Result<CompletionResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.is_disposed() {
            return Err(TrialError::MemoryDisposal("engine already disposed".into()).into());
        }
        match self.next_behavior() {
            FakeBehavior::Reply { content, usage } => Ok(CompletionResponse { content, usage }),
            FakeBehavior::Fail(err) => Err(err.into()),
            FakeBehavior::Hang => {
                std::future::pending::<()>().await;
                unreachable!("pending future resolved")
            }
        }
    }

    async fn dispose(&self) -> anyhow::Result<()> {
        self.disposed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Manager holding one current engine; recreation hands out a configured
/// replacement (a fresh `pong` engine by default) or fails on demand.
pub struct FakeModelManager {
    current: Mutex<Option<Arc<dyn InferenceEngine>>>,
    replacement: Mutex<Option<Arc<dyn InferenceEngine>>>,
    fail_recreate: AtomicBool,
    recreate_calls: AtomicUsize,
}

impl FakeModelManager {
    pub fn new(current: Option<Arc<dyn InferenceEngine>>) -> Self {
        Self {
            current: Mutex::new(current),
            replacement: Mutex::new(None),
            fail_recreate: AtomicBool::new(false),
            recreate_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_replacement(self, engine: Arc<dyn InferenceEngine>) -> Self {
        *self.replacement.lock().unwrap() = Some(engine);
        self
    }

    pub fn fail_recreate(self) -> Self {
        self.fail_recreate.store(true, Ordering::SeqCst);
        self
    }

    pub fn recreate_calls(&self) -> usize {
        self.recreate_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelManager for FakeModelManager {
    fn current_engine(&self) -> Option<Arc<dyn InferenceEngine>> {
        self.current.lock().unwrap().clone()
    }

    fn install_engine(&self, engine: Arc<dyn InferenceEngine>) {
        *self.current.lock().unwrap() = Some(engine);
    }

    async fn force_recreate_engine(
        &self,
        tier: TierId,
    ) -> anyhow::Result<Arc<dyn InferenceEngine>> {
        self.recreate_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_recreate.load(Ordering::SeqCst) {
            anyhow::bail!("model manager could not rebuild {} engine", tier);
        }
        if let Some(replacement) = self.replacement.lock().unwrap().take() {
            return Ok(replacement);
        }
        Ok(Arc::new(FakeEngine::replying("pong", 4)))
    }
}
