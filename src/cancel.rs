use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::UploadError;

/// Shared cancellation flag checked by the pipeline between stages.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn check(&self) -> Result<(), UploadError> {
        if self.is_cancelled() {
            Err(UploadError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Cancels the token once the returned guard is dropped, e.g. when the
    /// request future owning it goes away.
    pub fn drop_guard(&self) -> DropGuard {
        DropGuard(self.clone())
    }
}

pub struct DropGuard(CancelToken);

impl Drop for DropGuard {
    fn drop(&mut self) {
        self.0.cancel();
    }
}
