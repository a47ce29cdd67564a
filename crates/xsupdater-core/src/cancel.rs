use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::UpdateError;

/// Cooperative cancellation flag shared between the signal source and the
/// pipeline. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<(), UpdateError> {
        if self.is_cancelled() {
            return Err(UpdateError::Cancelled);
        }
        Ok(())
    }
}
