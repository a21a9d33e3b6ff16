use portable_atomic::{AtomicBool, Ordering};

/// Run-completion signal raised from a PIO interrupt handler.
///
/// The handler is the only writer of `true`; the orchestrator clears the flag
/// before each run and polls it afterwards.
pub struct CompletionFlag(AtomicBool);

impl CompletionFlag {
    pub const fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::Release);
    }

    /// Called from interrupt context. Does nothing else.
    pub fn signal(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

impl Default for CompletionFlag {
    fn default() -> Self {
        Self::new()
    }
}

pub static CAPTURE_DONE: CompletionFlag = CompletionFlag::new();
pub static GENERATE_DONE: CompletionFlag = CompletionFlag::new();
