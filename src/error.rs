//! Error types surfaced by cache operations.

use std::error::Error as StdError;
use std::sync::Arc;

/// Boxed error returned by user callbacks (loaders, expiry policies).
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Shared form of a callback failure.  Every waiter on a failed computation
/// receives a clone of the same error.
pub type SharedError = Arc<dyn StdError + Send + Sync + 'static>;

/// Why a cache operation or computation did not produce a value.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    /// The loader or mapping function failed.
    #[error("value computation failed: {0}")]
    Load(#[source] SharedError),

    /// The variable expiry policy failed; the triggering operation had no effect.
    #[error("expiry policy failed: {0}")]
    Expiry(#[source] SharedError),

    /// The computation was cancelled before it produced a value.
    #[error("computation was cancelled")]
    Cancelled,

    /// A bulk load was requested from a loader that only loads single keys.
    #[error("loader does not support bulk loading")]
    BulkUnsupported,
}

impl CacheError {
    pub fn load(err: impl Into<BoxError>) -> Self {
        CacheError::Load(Arc::from(err.into()))
    }

    pub fn expiry(err: impl Into<BoxError>) -> Self {
        CacheError::Expiry(Arc::from(err.into()))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, CacheError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_error_keeps_source() {
        let err = CacheError::load("backend down");
        assert_eq!(err.to_string(), "value computation failed: backend down");
        assert!(err.source().is_some());
        assert!(!err.is_cancelled());
    }

    #[test]
    fn clones_share_the_source() {
        let err = CacheError::expiry("bad duration");
        let clone = err.clone();
        match (err, clone) {
            (CacheError::Expiry(a), CacheError::Expiry(b)) => assert!(Arc::ptr_eq(&a, &b)),
            _ => unreachable!(),
        }
    }
}
