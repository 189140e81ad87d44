use std::sync::Arc;

use futures::future;
use tokio_util::sync::CancellationToken;

use crate::cell::{Outcome, ResultCell};
use crate::error::LoadError;

/// A deferred result for one key, returned by [`Loader::load_thunk`](crate::Loader::load_thunk).
///
/// The key has already been admitted to the loader (and possibly dispatched) by the time the thunk
/// exists; waiting on it only observes the result. A thunk can be cloned and waited on any number
/// of times, always yielding the same outcome.
pub struct Thunk<V, E> {
    cell: Arc<ResultCell<V, E>>,
}

impl<V, E> Clone for Thunk<V, E> {
    fn clone(&self) -> Self {
        Self { cell: Arc::clone(&self.cell) }
    }
}

impl<V: Clone, E> Thunk<V, E> {
    pub(crate) fn new(cell: Arc<ResultCell<V, E>>) -> Self {
        Self { cell }
    }

    /// Waits for the key's batch to complete.
    pub async fn wait(&self) -> Result<V, LoadError<E>> {
        self.cell.wait().await
    }

    /// Waits for the key's batch to complete, giving up with [`LoadError::Canceled`] once `token`
    /// is cancelled. Giving up leaves the batch and the cached cell untouched.
    pub async fn wait_or_cancel(&self, token: &CancellationToken) -> Result<V, LoadError<E>> {
        tokio::select! {
            biased;
            outcome = self.cell.wait() => outcome,
            _ = token.cancelled() => Err(LoadError::Canceled),
        }
    }

    /// Returns the result if it is already available.
    pub fn try_get(&self) -> Option<Result<V, LoadError<E>>> {
        self.cell.try_get()
    }
}

/// A deferred result for a list of keys, returned by
/// [`Loader::load_all_thunk`](crate::Loader::load_all_thunk).
///
/// Results come back in the order the keys were passed in, whatever batches the keys landed in.
pub struct ThunkAll<V, E> {
    cells: Vec<Arc<ResultCell<V, E>>>,
}

impl<V, E> Clone for ThunkAll<V, E> {
    fn clone(&self) -> Self {
        Self { cells: self.cells.clone() }
    }
}

impl<V: Clone, E> ThunkAll<V, E> {
    pub(crate) fn new(cells: Vec<Arc<ResultCell<V, E>>>) -> Self {
        Self { cells }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Waits for every key's batch to complete.
    pub async fn wait(&self) -> Vec<Result<V, LoadError<E>>> {
        future::join_all(self.cells.iter().map(|cell| cell.wait())).await
    }

    /// Like [`ThunkAll::wait`], but stops waiting once `token` is cancelled. Keys that had
    /// already resolved keep their result; the rest report [`LoadError::Canceled`].
    pub async fn wait_or_cancel(&self, token: &CancellationToken) -> Vec<Result<V, LoadError<E>>> {
        tokio::select! {
            biased;
            outcomes = self.wait() => outcomes,
            _ = token.cancelled() => {
                self.cells.iter().map(|cell| settled_or_canceled(cell)).collect()
            }
        }
    }
}

fn settled_or_canceled<V: Clone, E>(cell: &ResultCell<V, E>) -> Outcome<V, E> {
    cell.try_get().unwrap_or(Err(LoadError::Canceled))
}
