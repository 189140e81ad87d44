use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::slice;
use std::sync::Arc;

use futures::future::FutureExt;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing_futures::Instrument;

#[cfg(feature = "stats")]
use crate::stats::LoaderStats;
use crate::{
    batch::{Batch, FetchFn},
    batch_function::BatchFunction,
    cache::Cache,
    cell::ResultCell,
    config::LoaderConfig,
    error::LoadError,
    thunk::{Thunk, ThunkAll},
};

type CellRef<V, E> = Arc<ResultCell<V, E>>;

/// Batch loads values from some expensive resource, coalescing concurrent requests for distinct
/// keys into a small number of `BatchFunction` calls and caching every outcome.
///
/// Callers can invoke the `Loader` from many parallel tasks. A key that is not cached joins the
/// currently open batch (opening one if needed). The batch is dispatched when it reaches the
/// configured capacity or when its wait window elapses, whichever comes first. Dispatch happens on
/// a runtime task, outside the loader lock, so new batches keep forming while earlier ones are in
/// flight.
///
/// Results are cached per key until [`Loader::clear`], [`Loader::clear_many`] or
/// [`Loader::clear_all`]; that includes errors, which are not retried automatically. Values can be
/// added to the cache out-of-band through [`Loader::prime`] and [`Loader::prime_many`].
///
/// Clearing a key whose batch is still in flight only detaches it from the cache: callers already
/// waiting on it get the in-flight result, but that result is not written back, and the next load
/// of the key starts a new fetch.
pub struct Loader<K, V, E> {
    inner: Arc<LoaderInner<K, V, E>>,
}

struct LoaderInner<K, V, E> {
    state: Mutex<LoaderState<K, V, E>>,
    fetch: Box<FetchFn<K, V, E>>,
    config: LoaderConfig,
    runtime: Handle,
    debug_name: &'static str,
}

/// Everything guarded by the loader lock. The lock is only held for bookkeeping, never across a
/// batch function call.
struct LoaderState<K, V, E> {
    cache: HashMap<K, CellRef<V, E>>,
    current: Option<Batch<K, V, E>>,
    next_batch_id: u64,
    #[cfg(feature = "stats")]
    stats: LoaderStats,
}

impl<K, V, E> Clone for Loader<K, V, E> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<K, V, E> Loader<K, V, E>
where
    K: 'static + Eq + Hash + Clone + Debug + Send + Sync,
    V: 'static + Clone + Send + Sync,
    E: 'static + Send + Sync,
{
    /// Creates a new Loader for the provided BatchFunction and Context type, using the default
    /// [`LoaderConfig`].
    ///
    /// Note: the batch function is passed in as a marker for type inference.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime.
    pub fn new<F, ContextT>(batch_fn: F, context: ContextT) -> Self
    where
        ContextT: Send + Sync + 'static,
        F: 'static + BatchFunction<K, V, Context = ContextT, Error = E>,
    {
        Self::with_config(batch_fn, context, LoaderConfig::default())
    }

    /// Creates a new Loader with explicit batching options.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime.
    pub fn with_config<F, ContextT>(_: F, context: ContextT, config: LoaderConfig) -> Self
    where
        ContextT: Send + Sync + 'static,
        F: 'static + BatchFunction<K, V, Context = ContextT, Error = E>,
    {
        let context = Arc::new(context);
        let fetch = move |keys: Vec<K>| {
            let context = Arc::clone(&context);
            async move { F::load(&keys, &context).await }.boxed()
        };
        let debug_name = std::any::type_name::<(K, V)>();
        Self {
            inner: Arc::new(LoaderInner {
                state: Mutex::new(LoaderState::new(debug_name)),
                fetch: Box::new(fetch),
                config,
                runtime: Handle::current(),
                debug_name,
            }),
        }
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.inner.config
    }

    /// Loads a value from the underlying resource, or from the cache if the key already has a
    /// result (or a pending fetch).
    #[tracing::instrument(skip(self), level = "trace")]
    pub async fn load(&self, key: K) -> Result<V, LoadError<E>> {
        self.load_thunk(key).wait().await
    }

    /// Like [`Loader::load`], but gives up with [`LoadError::Canceled`] once `token` is cancelled.
    /// The key stays queued or in flight for every other caller.
    pub async fn load_or_cancel(
        &self,
        key: K,
        token: &CancellationToken,
    ) -> Result<V, LoadError<E>> {
        self.load_thunk(key).wait_or_cancel(token).await
    }

    /// Admits the key right away and returns a handle to wait on later. Useful for queueing many
    /// keys before awaiting any of them.
    pub fn load_thunk(&self, key: K) -> Thunk<V, E> {
        let mut closed = Vec::new();
        let cell = {
            let mut state = self.inner.state.lock();
            #[cfg(feature = "stats")]
            state.stats.record_load_request(1);
            self.admit(&mut state, key, &mut closed)
        };
        self.inner.dispatch_closed(closed);
        Thunk::new(cell)
    }

    /// Loads many values at once. The results are in the same order as `keys`; a key repeated in
    /// the input is fetched once and its result repeated in the output.
    #[tracing::instrument(skip_all, level = "trace")]
    pub async fn load_all<I>(&self, keys: I) -> Vec<Result<V, LoadError<E>>>
    where
        I: IntoIterator<Item = K>,
    {
        self.load_all_thunk(keys).wait().await
    }

    /// Like [`Loader::load_all`], but stops waiting once `token` is cancelled. Keys that had not
    /// resolved by then report [`LoadError::Canceled`].
    pub async fn load_all_or_cancel<I>(
        &self,
        keys: I,
        token: &CancellationToken,
    ) -> Vec<Result<V, LoadError<E>>>
    where
        I: IntoIterator<Item = K>,
    {
        self.load_all_thunk(keys).wait_or_cancel(token).await
    }

    /// Admits every key right away, in input order, and returns a handle to wait on later.
    pub fn load_all_thunk<I>(&self, keys: I) -> ThunkAll<V, E>
    where
        I: IntoIterator<Item = K>,
    {
        // The caller's iterator may call back into this loader, so drain it before locking.
        let keys = keys.into_iter().collect::<Vec<_>>();
        let mut closed = Vec::new();
        let cells = {
            let mut state = self.inner.state.lock();
            let cells = keys
                .into_iter()
                .map(|key| self.admit(&mut state, key, &mut closed))
                .collect::<Vec<_>>();
            #[cfg(feature = "stats")]
            state.stats.record_load_request(cells.len());
            cells
        };
        self.inner.dispatch_closed(closed);
        ThunkAll::new(cells)
    }

    /// Adds a value to the cache if the key has no entry yet. A key that is cached, or already
    /// being fetched, is left untouched.
    ///
    /// Returns whether the value was stored.
    pub fn prime(&self, key: K, value: V) -> bool {
        let mut state = self.inner.state.lock();
        let (_, inserted) =
            state.cache.get_or_insert_with(key, || Arc::new(ResultCell::resolved(value)));
        inserted
    }

    /// Adds many values to the cache at once, with the same rule as [`Loader::prime`].
    pub fn prime_many<I>(&self, key_vals: I)
    where
        I: IntoIterator<Item = (K, V)>,
    {
        let key_vals = key_vals.into_iter().collect::<Vec<_>>();
        let mut state = self.inner.state.lock();
        for (key, value) in key_vals {
            state.cache.get_or_insert_with(key, || Arc::new(ResultCell::resolved(value)));
        }
    }

    /// Removes a value from the cache.
    ///
    /// This key will be reloaded when it is next requested.
    pub fn clear(&self, key: &K) {
        self.inner.state.lock().cache.evict(slice::from_ref(key));
    }

    /// Removes multiple values from the cache at once.
    ///
    /// These keys will be reloaded when requested.
    pub fn clear_many(&self, keys: &[K]) {
        self.inner.state.lock().cache.evict(keys);
    }

    /// Empties the cache.
    pub fn clear_all(&self) {
        self.inner.state.lock().cache.flush();
    }

    /// Snapshot of the loader's counters.
    #[cfg(feature = "stats")]
    pub fn stats(&self) -> LoaderStats {
        self.inner.state.lock().stats.clone()
    }

    /// Returns the key's cell, admitting it to the open batch on a cache miss. Batches that reach
    /// capacity are closed and pushed onto `closed` for the caller to dispatch once the lock is
    /// released.
    fn admit(
        &self,
        state: &mut LoaderState<K, V, E>,
        key: K,
        closed: &mut Vec<Batch<K, V, E>>,
    ) -> CellRef<V, E> {
        if let Some(cell) = state.cache.lookup(&key) {
            let cell = Arc::clone(cell);
            tracing::trace!(?key, "cache hit");
            #[cfg(feature = "stats")]
            state.stats.record_cache_hit();
            return cell;
        }

        let mut batch = match state.current.take() {
            Some(batch) => batch,
            None => {
                let id = state.next_batch_id;
                state.next_batch_id += 1;
                self.open_batch(id)
            }
        };
        let cell = batch.admit(key.clone());
        state.cache.get_or_insert_with(key, || Arc::clone(&cell));

        if self.inner.config.is_full(batch.len()) {
            tracing::debug!(batch = batch.id(), keys = batch.len(), "batch reached capacity");
            batch.cancel_timer();
            closed.push(batch);
        } else {
            state.current = Some(batch);
        }
        cell
    }

    fn open_batch(&self, id: u64) -> Batch<K, V, E> {
        let mut batch = Batch::new(id);
        let inner = Arc::clone(&self.inner);
        let wait = self.inner.config.wait();
        batch.set_timer(self.inner.runtime.spawn(async move {
            tokio::time::sleep(wait).await;
            inner.close_expired(id).await;
        }));
        tracing::debug!(batch = id, ?wait, "opened batch");
        batch
    }
}

impl<K, V, E> LoaderState<K, V, E> {
    #[cfg_attr(not(feature = "stats"), allow(unused_variables))]
    fn new(debug_name: &'static str) -> Self {
        Self {
            cache: HashMap::new(),
            current: None,
            next_batch_id: 0,
            #[cfg(feature = "stats")]
            stats: LoaderStats::new(debug_name),
        }
    }
}

impl<K, V, E> LoaderInner<K, V, E>
where
    K: 'static + Eq + Hash + Clone + Debug + Send + Sync,
    V: 'static + Clone + Send + Sync,
    E: 'static + Send + Sync,
{
    /// Dispatches the batch opened with `id` if it is still the open one. A batch that already
    /// closed on capacity has been replaced (or removed) by the time its timer fires.
    async fn close_expired(self: Arc<Self>, id: u64) {
        let batch = {
            let mut state = self.state.lock();
            let expired = state.current.as_ref().map_or(false, |batch| batch.id() == id);
            if expired {
                state.current.take()
            } else {
                None
            }
        };
        if let Some(batch) = batch {
            tracing::debug!(batch = id, keys = batch.len(), "wait window elapsed");
            self.dispatch(batch).await;
        }
    }

    fn dispatch_closed(self: &Arc<Self>, closed: Vec<Batch<K, V, E>>) {
        for batch in closed {
            let inner = Arc::clone(self);
            self.runtime.spawn(async move { inner.dispatch(batch).await });
        }
    }

    async fn dispatch(&self, batch: Batch<K, V, E>) {
        let span = tracing::debug_span!("dispatch", loader = self.debug_name, batch = batch.id());
        #[cfg(feature = "stats")]
        self.state.lock().stats.record_dispatch(batch.len());

        let filled = batch.dispatch(&*self.fetch).instrument(span).await;

        // Counters must include this batch before any of its waiters can observe the results.
        #[cfg(feature = "stats")]
        {
            let summary = filled.summary;
            self.state.lock().stats.record_dispatch_completed(summary.loaded, summary.failed);
        }
        filled.wake();
    }
}

#[cfg(feature = "stats")]
impl<K, V, E> Drop for LoaderInner<K, V, E> {
    fn drop(&mut self) {
        tracing::debug!(loader = self.debug_name, stats = ?self.state.get_mut().stats);
    }
}
