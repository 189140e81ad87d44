use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::hash::{BuildHasher, Hash};

/// Storage for the loader's key to result-cell mapping.
///
/// The loader only needs lookups, fill-if-empty inserts and removals. Values are shared handles;
/// evicting one never affects callers already holding a clone.
pub trait Cache {
    type K;
    type V;

    fn lookup(&self, key: &Self::K) -> Option<&Self::V>;

    /// Inserts the value produced by `make` unless the key is already present. Returns the value
    /// stored for the key afterwards, and whether it was newly inserted.
    fn get_or_insert_with<F>(&mut self, key: Self::K, make: F) -> (&Self::V, bool)
    where
        F: FnOnce() -> Self::V;

    fn evict(&mut self, keys: &[Self::K]);
    fn flush(&mut self);
}

impl<K, V, S: BuildHasher> Cache for HashMap<K, V, S>
where
    K: Eq + Hash,
{
    type K = K;
    type V = V;

    fn lookup(&self, key: &Self::K) -> Option<&Self::V> {
        self.get(key)
    }

    fn get_or_insert_with<F>(&mut self, key: Self::K, make: F) -> (&Self::V, bool)
    where
        F: FnOnce() -> Self::V,
    {
        match self.entry(key) {
            Entry::Occupied(entry) => (&*entry.into_mut(), false),
            Entry::Vacant(entry) => (&*entry.insert(make()), true),
        }
    }

    fn evict(&mut self, keys: &[Self::K]) {
        for key in keys.iter() {
            self.remove(key);
        }
    }

    fn flush(&mut self) {
        self.clear();
    }
}
