//! Process-wide cancellation signal polled at pipeline stage boundaries.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::{error::Error, Result};

/// Cloneable cancellation flag shared between a reader and its owner.
///
/// The read pipeline polls the token after every parallel stage and between
/// subarray partitions. Once cancelled, a token stays cancelled; there is no
/// reset. Cancellation observed at a stage boundary takes priority over other
/// errors produced by the same stage.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> CancellationToken {
        CancellationToken(Arc::new(AtomicBool::new(false)))
    }

    /// Requests cancellation. Safe to call from any thread, any number of times.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Returns `Err(Cancelled)` if cancellation was requested.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::cancelled())
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::CancellationToken;

    #[test]
    fn cancel_is_sticky_and_shared() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(token.check().is_ok());

        clone.cancel();
        assert!(token.is_cancelled());
        assert!(token.check().unwrap_err().is_cancelled());
        assert!(clone.check().is_err());
    }
}
