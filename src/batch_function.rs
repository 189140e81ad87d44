use async_trait::async_trait;

/// What a single batch function call produces: one result per requested key, in the order the
/// keys were given, or a single error that fails the whole batch.
pub type BatchResult<V, E> = Result<Vec<Result<V, E>>, E>;

/// A `BatchFunction` defines the method through which some `Loader` fetches batched data from
/// some resource. It receives the distinct keys collected in one batch, in the order they were
/// first requested, and some user defined context struct owned by the `Loader`.
///
/// The returned vector must be index-aligned with `keys`: entry `i` is the outcome for `keys[i]`.
/// An `Err` for an individual entry fails only that key. Returning `Err` for the whole call fails
/// every key in the batch with that one error. Returning a vector of any other length is a bug
/// in the batch function; the `Loader` logs it and fails every key in the batch with
/// [`LoadError::ContractViolation`](crate::LoadError::ContractViolation).
///
/// Both successes and failures are cached until the key is cleared, so a failed key is not
/// retried on the next load. Retries, if wanted, belong inside the batch function.
///
/// Multiple `BatchFunctions` (and therefore loaders) can share the same context (likely through an
/// `Arc`).
#[async_trait]
pub trait BatchFunction<K, V> {
    type Context;
    type Error;

    async fn load(keys: &[K], context: &Self::Context) -> BatchResult<V, Self::Error>;
}
