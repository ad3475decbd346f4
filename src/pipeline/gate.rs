use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Whether the pacers emit real output
///
/// Only the encoder flips it; pacers and producer callbacks only read it.
#[derive(Debug, Clone, Default)]
pub struct EnableGate(Arc<AtomicBool>);

impl EnableGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enable(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn disable(&self) {
        self.0.store(false, Ordering::Release);
    }

    pub fn is_enabled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}
