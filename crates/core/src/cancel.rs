//! Cooperative cancellation flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cheap clonable handle over a single-writer, single-reader abort flag.
///
/// The engine polls the flag between sub-iterations; it never blocks on it.
/// Relaxed ordering is sufficient, there is no data published alongside the
/// flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request that the in-flight segmentation stop at its next probe point.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_the_flag() {
        let token = CancelToken::new();
        let observer_side = token.clone();
        assert!(!token.is_cancelled());
        observer_side.cancel();
        assert!(token.is_cancelled());
    }
}
