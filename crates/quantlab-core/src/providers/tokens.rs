//! Fallback token counting, used only when an engine response carries no
//! usage metadata.

pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> u32;
}

/// Rough estimate at ~4 characters per token, the usual heuristic for
/// English text. Good enough for thresholds; never used when the engine
/// reports real usage.
#[derive(Debug, Default, Clone)]
pub struct HeuristicTokenCounter;

impl TokenCounter for HeuristicTokenCounter {
    fn count(&self, text: &str) -> u32 {
        let chars = text.trim().chars().count();
        if chars == 0 {
            return 0;
        }
        chars.div_ceil(4) as u32
    }
}
