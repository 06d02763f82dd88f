//! Result delivery boundary. Sink failures are logged by the runner and
//! never propagate back into trial execution.

use crate::model::TrialResult;
use std::sync::Mutex;

pub trait ResultSink: Send + Sync {
    fn record(&self, result: &TrialResult) -> anyhow::Result<()>;
}

/// Vec-backed sink for tests and embedded callers.
#[derive(Debug, Default)]
pub struct MemorySink {
    results: Mutex<Vec<TrialResult>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<TrialResult> {
        self.results.lock().expect("sink poisoned").clone()
    }

    pub fn len(&self) -> usize {
        self.results.lock().expect("sink poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ResultSink for MemorySink {
    fn record(&self, result: &TrialResult) -> anyhow::Result<()> {
        self.results.lock().expect("sink poisoned").push(result.clone());
        Ok(())
    }
}
