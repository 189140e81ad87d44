use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Instant;

use futures::future::BoxFuture;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::batch_function::BatchResult;
use crate::cell::ResultCell;
use crate::error::LoadError;

/// Type-erased handle on a loader's `BatchFunction` and its context.
pub(crate) type FetchFn<K, V, E> =
    dyn Fn(Vec<K>) -> BoxFuture<'static, BatchResult<V, E>> + Send + Sync;

/// The keys collected for one call of the batch function.
///
/// A `Batch` is open while it sits in the loader state accepting keys. Closing it means taking it
/// out of the loader state, after which nothing can join it, and handing it to [`Batch::dispatch`]
/// which consumes it. Every cell admitted to the batch subscribes to its completion signal; the
/// signal fires once, after all of the batch's cells have been filled.
pub(crate) struct Batch<K, V, E> {
    id: u64,
    keys: Vec<K>,
    cells: Vec<Arc<ResultCell<V, E>>>,
    positions: HashMap<K, usize>,
    done: watch::Sender<bool>,
    opened_at: Instant,
    timer: Option<JoinHandle<()>>,
}

/// How the keys of a dispatched batch resolved.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DispatchSummary {
    pub loaded: usize,
    pub failed: usize,
}

/// A batch whose cells have all been written but whose waiters are still asleep.
///
/// Dropping it without calling [`FilledBatch::wake`] leaves the waiters with
/// [`LoadError::Abandoned`].
pub(crate) struct FilledBatch {
    id: u64,
    pub summary: DispatchSummary,
    done: watch::Sender<bool>,
}

impl FilledBatch {
    /// Fires the batch's completion signal, releasing every waiter at once.
    pub fn wake(self) -> DispatchSummary {
        self.done.send_replace(true);
        tracing::debug!(
            batch = self.id,
            loaded = self.summary.loaded,
            failed = self.summary.failed,
            "batch complete"
        );
        self.summary
    }
}

impl<K, V, E> Batch<K, V, E>
where
    K: Eq + Hash + Clone + Debug,
{
    pub fn new(id: u64) -> Self {
        let (done, _) = watch::channel(false);
        Self {
            id,
            keys: Vec::new(),
            cells: Vec::new(),
            positions: HashMap::new(),
            done,
            opened_at: Instant::now(),
            timer: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn set_timer(&mut self, timer: JoinHandle<()>) {
        self.timer = Some(timer);
    }

    /// Stops the wait-window timer. Used when the batch closes for another reason.
    pub fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }

    /// Adds `key` to the batch and returns the cell that will receive its result.
    ///
    /// A key that is already part of this batch is not added again; its existing cell is returned.
    pub fn admit(&mut self, key: K) -> Arc<ResultCell<V, E>> {
        if let Some(&pos) = self.positions.get(&key) {
            return Arc::clone(&self.cells[pos]);
        }
        let cell = Arc::new(ResultCell::pending(self.done.subscribe()));
        self.positions.insert(key.clone(), self.keys.len());
        self.keys.push(key);
        self.cells.push(Arc::clone(&cell));
        cell
    }

    /// Calls the batch function with this batch's keys, in admission order, and writes the
    /// results into the batch's cells. Waiters stay asleep until the returned batch is woken.
    pub async fn dispatch(self, fetch: &FetchFn<K, V, E>) -> FilledBatch {
        let Batch { id, keys, cells, done, opened_at, .. } = self;
        let expected = keys.len();
        tracing::debug!(
            batch = id,
            keys = expected,
            waited = ?opened_at.elapsed(),
            "dispatching batch"
        );

        let mut summary = DispatchSummary::default();
        match fetch(keys).await {
            Err(e) => {
                tracing::debug!(batch = id, "batch function failed the whole batch");
                let e = Arc::new(e);
                for cell in cells.iter() {
                    cell.fill(Err(LoadError::Batch(Arc::clone(&e))));
                }
                summary.failed = cells.len();
            }
            Ok(results) if results.len() != expected => {
                let returned = results.len();
                tracing::error!(
                    batch = id,
                    expected,
                    returned,
                    "batch function returned results misaligned with its keys"
                );
                for cell in cells.iter() {
                    cell.fill(Err(LoadError::ContractViolation { expected, returned }));
                }
                summary.failed = cells.len();
            }
            Ok(results) => {
                for (cell, result) in cells.iter().zip(results) {
                    match result {
                        Ok(value) => {
                            summary.loaded += 1;
                            cell.fill(Ok(value));
                        }
                        Err(e) => {
                            summary.failed += 1;
                            cell.fill(Err(LoadError::Key(Arc::new(e))));
                        }
                    }
                }
            }
        }

        FilledBatch { id, summary, done }
    }
}

#[cfg(test)]
mod tests {
    use futures::FutureExt;
    use parking_lot::Mutex;

    use super::*;

    type TestFetch = Box<FetchFn<&'static str, String, String>>;

    fn fetch_fn<F>(f: F) -> TestFetch
    where
        F: Fn(Vec<&'static str>) -> BoxFuture<'static, BatchResult<String, String>>
            + Send
            + Sync
            + 'static,
    {
        Box::new(f)
    }

    fn recording_fetch(calls: Arc<Mutex<Vec<Vec<&'static str>>>>) -> TestFetch {
        fetch_fn(move |keys| {
            calls.lock().push(keys.clone());
            async move {
                Ok(keys
                    .into_iter()
                    .map(|k| {
                        if k.starts_with('E') {
                            Err(format!("{k} not found"))
                        } else {
                            Ok(k.to_lowercase())
                        }
                    })
                    .collect())
            }
            .boxed()
        })
    }

    #[tokio::test]
    async fn duplicate_keys_share_a_cell() {
        let mut batch = Batch::<&str, String, String>::new(1);
        let a = batch.admit("A");
        let b = batch.admit("B");
        let a_again = batch.admit("A");
        assert_eq!(batch.len(), 2);
        assert!(Arc::ptr_eq(&a, &a_again));
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn results_follow_key_positions() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let fetch = recording_fetch(Arc::clone(&calls));

        let mut batch = Batch::new(1);
        let cells = ["U1", "E1", "U2"].map(|k| batch.admit(k));
        let summary = batch.dispatch(&*fetch).await.wake();

        assert_eq!(summary, DispatchSummary { loaded: 2, failed: 1 });
        assert_eq!(*calls.lock(), vec![vec!["U1", "E1", "U2"]]);
        assert_eq!(cells[0].wait().await.ok().as_deref(), Some("u1"));
        assert_eq!(cells[1].wait().await.unwrap_err().to_string(), "E1 not found");
        assert_eq!(cells[2].wait().await.ok().as_deref(), Some("u2"));
    }

    #[tokio::test]
    async fn whole_batch_failure_reaches_every_cell() {
        let fetch = fetch_fn(|_keys| async { Err("backend down".to_owned()) }.boxed());

        let mut batch = Batch::new(1);
        let a = batch.admit("A");
        let b = batch.admit("B");
        let summary = batch.dispatch(&*fetch).await.wake();

        assert_eq!(summary, DispatchSummary { loaded: 0, failed: 2 });
        for cell in [a, b] {
            let err = cell.wait().await.unwrap_err();
            assert!(matches!(err, LoadError::Batch(_)));
            assert_eq!(err.to_string(), "backend down");
        }
    }

    #[tokio::test]
    async fn short_result_vector_is_a_contract_violation() {
        let fetch = fetch_fn(|_keys| async { Ok(vec![Ok("only one".to_owned())]) }.boxed());

        let mut batch = Batch::new(1);
        let a = batch.admit("A");
        let b = batch.admit("B");
        batch.dispatch(&*fetch).await.wake();

        for cell in [a, b] {
            assert!(matches!(
                cell.wait().await,
                Err(LoadError::ContractViolation { expected: 2, returned: 1 })
            ));
        }
    }
}
