//! Stop/pause signal source checked at the trial's cooperative
//! cancellation points.

use std::sync::atomic::{AtomicBool, Ordering};

pub trait ControlSignals: Send + Sync {
    fn stop_requested(&self) -> bool;
    fn is_paused(&self) -> bool;
}

/// Plain atomic flags. The UI layer flips these; the runner only reads.
#[derive(Debug, Default)]
pub struct AtomicControls {
    stop: AtomicBool,
    paused: AtomicBool,
}

impl AtomicControls {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }
}

impl ControlSignals for AtomicControls {
    fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }
}
