/// Counters describing how well a `Loader` coalesced its traffic.
///
/// Only compiled with the `stats` feature. A snapshot can be taken at any time with
/// [`Loader::stats`](crate::Loader::stats), and the final numbers are logged at `debug` level
/// when the loader is dropped.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct LoaderStats {
    /// Human readable name used to identify these stats when they are reported.
    pub tag: &'static str,
    /// Number of load calls (single, many, or thunk) received by the loader.
    pub load_requests: u64,
    /// The total number of keys that were requested (not necessarily unique).
    pub items_requested: u64,
    /// The number of requested keys that already had a cell in the cache.
    pub cache_hits: u64,
    /// Number of batch function calls made.
    pub dispatches: u64,
    /// The average number of keys handed to the batch function.
    pub average_batch_size: f64,
    /// The max number of keys handed to a single batch function call.
    pub max_batch_size: usize,
    /// The min number of keys handed to a single batch function call, `None` before the first
    /// dispatch.
    pub min_batch_size: Option<usize>,
    /// Keys that resolved to a value.
    pub items_loaded: u64,
    /// Keys that resolved to an error.
    pub items_failed: u64,
}

impl LoaderStats {
    pub(crate) fn new(tag: &'static str) -> Self {
        Self { tag, ..Default::default() }
    }

    pub(crate) fn record_load_request(&mut self, items_requested: usize) {
        self.load_requests += 1;
        self.items_requested += items_requested as u64;
    }

    pub(crate) fn record_cache_hit(&mut self) {
        self.cache_hits += 1;
    }

    pub(crate) fn record_dispatch(&mut self, batch_size: usize) {
        let new_total = self.dispatches + 1;
        let total_keys = self.average_batch_size * self.dispatches as f64 + batch_size as f64;
        self.average_batch_size = total_keys / new_total as f64;
        self.dispatches = new_total;
        self.max_batch_size = self.max_batch_size.max(batch_size);
        self.min_batch_size =
            Some(self.min_batch_size.map_or(batch_size, |min| min.min(batch_size)));
    }

    pub(crate) fn record_dispatch_completed(&mut self, loaded: usize, failed: usize) {
        self.items_loaded += loaded as u64;
        self.items_failed += failed as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_size_extremes_and_average() {
        let mut stats = LoaderStats::new("test");
        stats.record_dispatch(5);
        stats.record_dispatch(3);
        stats.record_dispatch(1);
        assert_eq!(stats.dispatches, 3);
        assert_eq!(stats.max_batch_size, 5);
        assert_eq!(stats.min_batch_size, Some(1));
        assert!((stats.average_batch_size - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn no_min_batch_size_before_first_dispatch() {
        let stats = LoaderStats::new("test");
        assert_eq!(stats.min_batch_size, None);
        assert_eq!(stats.max_batch_size, 0);
    }

    #[test]
    fn requests_and_outcomes_accumulate() {
        let mut stats = LoaderStats::new("test");
        stats.record_load_request(1);
        stats.record_load_request(4);
        stats.record_cache_hit();
        stats.record_dispatch_completed(3, 1);
        assert_eq!(stats.load_requests, 2);
        assert_eq!(stats.items_requested, 5);
        assert_eq!(stats.cache_hits, 1);
        assert_eq!((stats.items_loaded, stats.items_failed), (3, 1));
    }
}
