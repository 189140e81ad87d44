use std::time::Duration;

/// Default coalescing delay before an open batch is dispatched.
pub const DEFAULT_WAIT: Duration = Duration::from_millis(16);

/// Options controlling how a [`Loader`](crate::Loader) forms batches.
///
/// ```
/// use std::time::Duration;
/// use batchload::LoaderConfig;
///
/// let config = LoaderConfig::default()
///     .with_batch_capacity(100)
///     .with_wait(Duration::from_millis(2));
/// assert_eq!(config.batch_capacity(), Some(100));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoaderConfig {
    batch_capacity: Option<usize>,
    wait: Duration,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self { batch_capacity: None, wait: DEFAULT_WAIT }
    }
}

impl LoaderConfig {
    /// Caps the number of distinct keys handed to a single batch function call. Once an open
    /// batch reaches this many keys it is dispatched immediately.
    ///
    /// A capacity of `0` means unbounded, which is also the default.
    #[must_use]
    pub fn with_batch_capacity(self, capacity: usize) -> Self {
        Self { batch_capacity: (capacity > 0).then_some(capacity), ..self }
    }

    /// Sets how long an open batch may collect keys before it is dispatched, measured from the
    /// first key admitted to it.
    #[must_use]
    pub fn with_wait(self, wait: Duration) -> Self {
        Self { wait, ..self }
    }

    pub fn batch_capacity(&self) -> Option<usize> {
        self.batch_capacity
    }

    pub fn wait(&self) -> Duration {
        self.wait
    }

    pub(crate) fn is_full(&self, batch_len: usize) -> bool {
        self.batch_capacity.map_or(false, |cap| batch_len >= cap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_unbounded_with_short_wait() {
        let config = LoaderConfig::default();
        assert_eq!(config.batch_capacity(), None);
        assert_eq!(config.wait(), DEFAULT_WAIT);
        assert!(!config.is_full(usize::MAX));
    }

    #[test]
    fn zero_capacity_means_unbounded() {
        let config = LoaderConfig::default().with_batch_capacity(5).with_batch_capacity(0);
        assert_eq!(config.batch_capacity(), None);
    }

    #[test]
    fn full_at_capacity() {
        let config = LoaderConfig::default().with_batch_capacity(5);
        assert!(!config.is_full(4));
        assert!(config.is_full(5));
    }
}
