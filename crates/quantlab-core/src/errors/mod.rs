//! Failure taxonomy for trial execution.
//!
//! Errors raised inside this crate are typed [`TrialError`] variants, so
//! classification is a match, not a substring search. Errors crossing in
//! from collaborators (engines, managers) arrive as `anyhow::Error`; those
//! fall back to message classification, flagged as legacy.

use serde::{Deserialize, Serialize};

/// The six terminal categories, in classification priority order.
/// Only the first two are recoverable via engine recreation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    MemoryDisposal,
    EngineNotReady,
    Timeout,
    UserStopped,
    CompletionApi,
    General,
}

impl ErrorCategory {
    pub fn is_recoverable(self) -> bool {
        matches!(
            self,
            ErrorCategory::MemoryDisposal | ErrorCategory::EngineNotReady
        )
    }

    /// Upper-case label used in result notes.
    pub fn label(self) -> &'static str {
        match self {
            ErrorCategory::MemoryDisposal => "MEMORY_DISPOSAL",
            ErrorCategory::EngineNotReady => "ENGINE_NOT_READY",
            ErrorCategory::Timeout => "TIMEOUT",
            ErrorCategory::UserStopped => "USER_STOPPED",
            ErrorCategory::CompletionApi => "COMPLETION_API",
            ErrorCategory::General => "GENERAL",
        }
    }

    /// Recommended remedial action carried into result notes.
    pub fn guidance(self) -> &'static str {
        match self {
            ErrorCategory::MemoryDisposal => {
                "engine buffers were released mid-run; recreate the engine before retrying"
            }
            ErrorCategory::EngineNotReady => {
                "engine did not answer the readiness probe; reload the model or pick a lower tier"
            }
            ErrorCategory::Timeout => {
                "completion exceeded the tier budget; reduce max_tokens or move to a faster tier"
            }
            ErrorCategory::UserStopped => "execution was stopped by user request",
            ErrorCategory::CompletionApi => {
                "completion API rejected the request; check the request shape and engine logs"
            }
            ErrorCategory::General => "unclassified failure; inspect the engine logs",
        }
    }
}

/// Typed trial failure. Variants mirror [`ErrorCategory`] one-to-one.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TrialError {
    #[error("engine memory disposed: {0}")]
    MemoryDisposal(String),
    #[error("engine not ready: {0}")]
    EngineNotReady(String),
    #[error("completion timed out: {0}")]
    Timeout(String),
    #[error("stopped by user request")]
    UserStopped,
    #[error("completion API error: {0}")]
    CompletionApi(String),
    #[error("{0}")]
    General(String),
}

impl TrialError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            TrialError::MemoryDisposal(_) => ErrorCategory::MemoryDisposal,
            TrialError::EngineNotReady(_) => ErrorCategory::EngineNotReady,
            TrialError::Timeout(_) => ErrorCategory::Timeout,
            TrialError::UserStopped => ErrorCategory::UserStopped,
            TrialError::CompletionApi(_) => ErrorCategory::CompletionApi,
            TrialError::General(_) => ErrorCategory::General,
        }
    }

    /// Classify a free-form message. First match wins, checked in the
    /// priority order of [`ErrorCategory`].
    pub fn classify_message(message: &str) -> ErrorCategory {
        let msg = message.to_lowercase();
        if msg.contains("dispose") || msg.contains("ndarray") || msg.contains("buffer freed") {
            ErrorCategory::MemoryDisposal
        } else if msg.contains("not ready")
            || msg.contains("not initialized")
            || msg.contains("engine unavailable")
            || msg.contains("no engine")
        {
            ErrorCategory::EngineNotReady
        } else if msg.contains("timeout") || msg.contains("timed out") || msg.contains("deadline") {
            ErrorCategory::Timeout
        } else if msg.contains("stopped by user") || msg.contains("stop requested") {
            ErrorCategory::UserStopped
        } else if msg.contains("completion") || msg.contains("api error") {
            ErrorCategory::CompletionApi
        } else {
            ErrorCategory::General
        }
    }

    /// Build a typed error from a classified foreign message.
    pub fn legacy_from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        match Self::classify_message(&message) {
            ErrorCategory::MemoryDisposal => TrialError::MemoryDisposal(message),
            ErrorCategory::EngineNotReady => TrialError::EngineNotReady(message),
            ErrorCategory::Timeout => TrialError::Timeout(message),
            ErrorCategory::UserStopped => TrialError::UserStopped,
            ErrorCategory::CompletionApi => TrialError::CompletionApi(message),
            ErrorCategory::General => TrialError::General(message),
        }
    }

    /// Prefer the typed variant when the anyhow chain carries one; otherwise
    /// fall back to message classification.
    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        if let Some(typed) = err.downcast_ref::<TrialError>() {
            return typed.clone();
        }
        tracing::debug!(error = %err, "classifying foreign error by message");
        Self::legacy_from_message(format!("{:#}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disposal_message_classifies_first() {
        // Real-world message from a WebGPU-backed engine teardown.
        assert_eq!(
            TrialError::classify_message("NDArray has already been disposed"),
            ErrorCategory::MemoryDisposal
        );
        // Disposal outranks timeout even when both substrings appear.
        assert_eq!(
            TrialError::classify_message("buffer disposed while awaiting timeout"),
            ErrorCategory::MemoryDisposal
        );
    }

    #[test]
    fn classification_follows_priority_order() {
        assert_eq!(
            TrialError::classify_message("engine not ready: model still loading"),
            ErrorCategory::EngineNotReady
        );
        assert_eq!(
            TrialError::classify_message("request timed out"),
            ErrorCategory::Timeout
        );
        assert_eq!(
            TrialError::classify_message("stopped by user"),
            ErrorCategory::UserStopped
        );
        assert_eq!(
            TrialError::classify_message("completion request rejected: bad temperature"),
            ErrorCategory::CompletionApi
        );
        assert_eq!(
            TrialError::classify_message("something odd happened"),
            ErrorCategory::General
        );
    }

    #[test]
    fn recoverability_is_limited_to_engine_state_failures() {
        assert!(ErrorCategory::MemoryDisposal.is_recoverable());
        assert!(ErrorCategory::EngineNotReady.is_recoverable());
        assert!(!ErrorCategory::Timeout.is_recoverable());
        assert!(!ErrorCategory::UserStopped.is_recoverable());
        assert!(!ErrorCategory::CompletionApi.is_recoverable());
        assert!(!ErrorCategory::General.is_recoverable());
    }

    #[test]
    fn foreign_timeout_messages_keep_their_text() {
        let err = TrialError::legacy_from_message("upstream request timed out waiting for GPU");
        assert_eq!(err.category(), ErrorCategory::Timeout);
        assert!(err.to_string().contains("upstream request timed out"));
    }

    #[test]
    fn from_anyhow_prefers_typed_variants() {
        let err = anyhow::Error::from(TrialError::Timeout("45000ms budget exceeded".into()));
        let classified = TrialError::from_anyhow(&err);
        assert_eq!(classified.category(), ErrorCategory::Timeout);

        let foreign = anyhow::anyhow!("backend reports: tensor disposed");
        assert_eq!(
            TrialError::from_anyhow(&foreign).category(),
            ErrorCategory::MemoryDisposal
        );
    }
}
