//! Collaborator traits consumed by the orchestrator, with the default
//! implementations this crate ships.

pub mod drift;
pub mod signal;
pub mod sink;
pub mod tokens;

pub use drift::{DriftDetector, DriftReport, TermOverlapDetector};
pub use signal::{AtomicControls, ControlSignals};
pub use sink::{MemorySink, ResultSink};
pub use tokens::{HeuristicTokenCounter, TokenCounter};
