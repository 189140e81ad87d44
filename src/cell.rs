use once_cell::sync::OnceCell;
use tokio::sync::watch;

use crate::error::LoadError;

pub(crate) type Outcome<V, E> = Result<V, LoadError<E>>;

/// The per-key result slot stored in the loader cache.
///
/// A cell starts out pending, holding a receiver for the completion signal of the batch that is
/// responsible for filling it. The batch writes every cell it owns and then fires the signal once,
/// so all waiters on one batch observe completion together. Primed cells are born resolved.
///
/// Once filled the outcome never changes. Clearing the key only drops the cache's reference; any
/// caller still holding the cell keeps seeing the same outcome.
pub(crate) struct ResultCell<V, E> {
    outcome: OnceCell<Outcome<V, E>>,
    ready: Option<watch::Receiver<bool>>,
}

impl<V, E> ResultCell<V, E> {
    pub fn pending(ready: watch::Receiver<bool>) -> Self {
        Self { outcome: OnceCell::new(), ready: Some(ready) }
    }

    pub fn resolved(value: V) -> Self {
        Self { outcome: OnceCell::with_value(Ok(value)), ready: None }
    }

    /// Stores the outcome. Waiters are not woken until the owning batch fires its signal.
    ///
    /// Returns false if the cell was already filled, in which case the old outcome is kept.
    pub fn fill(&self, outcome: Outcome<V, E>) -> bool {
        self.outcome.set(outcome).is_ok()
    }
}

impl<V: Clone, E> ResultCell<V, E> {
    /// Returns the outcome if the owning batch has completed, without waiting.
    pub fn try_get(&self) -> Option<Outcome<V, E>> {
        let fired = self.ready.as_ref().map_or(true, |ready| *ready.borrow());
        if fired {
            self.outcome.get().cloned()
        } else {
            None
        }
    }

    /// Waits until the owning batch has completed and returns a copy of the outcome.
    ///
    /// If the batch went away without ever completing (its dispatch task panicked or the runtime
    /// shut down) the waiter gets [`LoadError::Abandoned`].
    pub async fn wait(&self) -> Outcome<V, E> {
        if let Some(outcome) = self.try_get() {
            return outcome;
        }
        if let Some(ready) = &self.ready {
            let mut ready = ready.clone();
            while !*ready.borrow_and_update() {
                if ready.changed().await.is_err() {
                    break;
                }
            }
        }
        self.outcome.get().cloned().unwrap_or(Err(LoadError::Abandoned))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    type Cell = ResultCell<u32, String>;

    #[tokio::test]
    async fn resolved_cell_returns_immediately() {
        let cell = Cell::resolved(7);
        assert_eq!(cell.try_get().and_then(Result::ok), Some(7));
        assert_eq!(cell.wait().await.ok(), Some(7));
    }

    #[tokio::test]
    async fn waiters_wake_once_signal_fires() {
        let (tx, rx) = watch::channel(false);
        let cell = Arc::new(Cell::pending(rx));

        let waiters = (0..3)
            .map(|_| {
                let cell = Arc::clone(&cell);
                tokio::spawn(async move { cell.wait().await })
            })
            .collect::<Vec<_>>();

        assert!(cell.fill(Ok(11)));
        tx.send_replace(true);

        for waiter in waiters {
            assert_eq!(waiter.await.unwrap().ok(), Some(11));
        }
    }

    #[tokio::test]
    async fn first_fill_wins() {
        let (tx, rx) = watch::channel(false);
        let cell = Cell::pending(rx);
        assert!(cell.fill(Err(LoadError::Key(Arc::new("missing".to_owned())))));
        assert!(!cell.fill(Ok(1)));
        tx.send_replace(true);
        assert_eq!(cell.wait().await.unwrap_err().to_string(), "missing");
    }

    #[tokio::test]
    async fn filled_cell_stays_hidden_until_signal() {
        let (tx, rx) = watch::channel(false);
        let cell = Cell::pending(rx);
        cell.fill(Ok(3));
        assert!(cell.try_get().is_none());
        tx.send_replace(true);
        assert_eq!(cell.try_get().and_then(Result::ok), Some(3));
    }

    #[tokio::test]
    async fn dropped_batch_abandons_waiters() {
        let (tx, rx) = watch::channel(false);
        let cell = Cell::pending(rx);
        drop(tx);
        assert!(matches!(cell.wait().await, Err(LoadError::Abandoned)));
    }
}
