use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Shared flag asking a streaming loop to stop
///
/// Clones share the flag. Setting it is a single atomic store, so it may be done from a signal
/// handler.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
