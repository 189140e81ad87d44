use std::sync::Arc;

/// Error delivered to a caller waiting on a key.
///
/// Fetch errors are held behind an `Arc` so that the single error a
/// [`BatchFunction`](crate::BatchFunction) returns can be handed to every waiter (and every cell of
/// a failed batch) without requiring the error type itself to be `Clone`.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum LoadError<E> {
    /// The batch function reported a failure for this key only.
    #[error("{0}")]
    Key(Arc<E>),

    /// The batch function failed the whole batch this key was dispatched in.
    #[error("{0}")]
    Batch(Arc<E>),

    /// The caller stopped waiting before the key resolved. Never cached.
    #[error("load canceled before the key resolved")]
    Canceled,

    /// The batch responsible for this key was dropped before it produced results, e.g. because the
    /// batch function panicked or the runtime shut down.
    #[error("batch was abandoned before the key resolved")]
    Abandoned,

    /// The batch function returned a result vector whose length does not match the keys it was
    /// given. This is a bug in the batch function.
    #[error(
        "batch function returned {returned} results for {expected} keys; results must align with \
         the requested keys or the whole batch must fail"
    )]
    ContractViolation { expected: usize, returned: usize },
}

impl<E> LoadError<E> {
    /// The error produced by the batch function, if this error came from one.
    pub fn fetch_error(&self) -> Option<&E> {
        match self {
            LoadError::Key(e) | LoadError::Batch(e) => Some(e),
            LoadError::Canceled | LoadError::Abandoned | LoadError::ContractViolation { .. } => {
                None
            }
        }
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, LoadError::Canceled)
    }
}

impl<E> Clone for LoadError<E> {
    fn clone(&self) -> Self {
        match self {
            LoadError::Key(e) => LoadError::Key(Arc::clone(e)),
            LoadError::Batch(e) => LoadError::Batch(Arc::clone(e)),
            LoadError::Canceled => LoadError::Canceled,
            LoadError::Abandoned => LoadError::Abandoned,
            LoadError::ContractViolation { expected, returned } => {
                LoadError::ContractViolation { expected: *expected, returned: *returned }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("user not found")]
    struct NotFound;

    #[test]
    fn clone_shares_the_fetch_error() {
        let err = LoadError::Batch(Arc::new(NotFound));
        let cloned = err.clone();
        match (&err, &cloned) {
            (LoadError::Batch(a), LoadError::Batch(b)) => assert!(Arc::ptr_eq(a, b)),
            _ => panic!("clone changed the variant"),
        }
    }

    #[test]
    fn display_passes_fetch_errors_through() {
        assert_eq!(LoadError::Key(Arc::new(NotFound)).to_string(), "user not found");
        assert_eq!(LoadError::Batch(Arc::new(NotFound)).to_string(), "user not found");
    }

    #[test]
    fn contract_violation_names_both_lengths() {
        let err: LoadError<NotFound> = LoadError::ContractViolation { expected: 3, returned: 1 };
        let msg = err.to_string();
        assert!(msg.contains("returned 1 results for 3 keys"), "{msg}");
        assert!(err.fetch_error().is_none());
    }

    #[test]
    fn canceled_has_no_fetch_error() {
        let err: LoadError<NotFound> = LoadError::Canceled;
        assert!(err.is_canceled());
        assert!(err.fetch_error().is_none());
    }
}
