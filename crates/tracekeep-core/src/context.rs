use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::error::Interrupted;

/// Cancellation and deadline state threaded through every storage call.
///
/// Clones share the cancellation flag, so a handle kept by a signal handler
/// can abort a request running elsewhere. Storage implementations are
/// expected to call [`RequestContext::check`] before and while doing I/O.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            cancelled: Arc::default(),
            deadline: Some(deadline),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Fails once the request was cancelled or its deadline has passed.
    pub fn check(&self) -> Result<(), Interrupted> {
        if self.is_cancelled() {
            return Err(Interrupted::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(Interrupted::DeadlineExceeded),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_context_passes() {
        assert_eq!(RequestContext::new().check(), Ok(()));
        assert_eq!(RequestContext::with_timeout(Duration::from_secs(60)).check(), Ok(()));
    }

    #[test]
    fn test_cancel_is_shared_between_clones() {
        let ctx = RequestContext::new();
        let handle = ctx.clone();
        handle.cancel();
        assert_eq!(ctx.check(), Err(Interrupted::Cancelled));
    }

    #[test]
    fn test_expired_deadline() {
        let ctx = RequestContext::with_deadline(Instant::now() - Duration::from_millis(1));
        assert_eq!(ctx.check(), Err(Interrupted::DeadlineExceeded));
    }
}
