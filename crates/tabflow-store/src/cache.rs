//! Write-back LRU cache in front of a backend.

use std::num::NonZeroUsize;

use lru::LruCache;

struct Slot<V> {
    value: V,
    dirty: bool,
}

/// LRU map that remembers which entries have not reached the backend yet.
pub(crate) struct WriteBackCache<V> {
    lru: LruCache<String, Slot<V>>,
}

impl<V> WriteBackCache<V> {
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            lru: LruCache::new(cap),
        }
    }

    pub fn get(&mut self, key: &str) -> Option<&V> {
        self.lru.get(key).map(|slot| &slot.value)
    }

    /// Insert `value`. Returns the evicted entry if it was dirty; a clean
    /// eviction or an in-place replacement returns `None`.
    pub fn put(&mut self, key: String, value: V, dirty: bool) -> Option<(String, V)> {
        let incoming = key.clone();
        match self.lru.push(key, Slot { value, dirty }) {
            Some((old_key, old)) if old_key != incoming && old.dirty => Some((old_key, old.value)),
            _ => None,
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<V> {
        self.lru.pop(key).map(|slot| slot.value)
    }

    /// Hand every dirty entry to `flush` and mark it clean once `flush`
    /// accepted it.
    pub fn drain_dirty<E>(
        &mut self,
        mut flush: impl FnMut(&str, &V) -> Result<(), E>,
    ) -> Result<(), E> {
        for (key, slot) in self.lru.iter_mut() {
            if slot.dirty {
                flush(key, &slot.value)?;
                slot.dirty = false;
            }
        }
        Ok(())
    }

    /// Entries in key order, without touching recency.
    pub fn sorted(&self) -> Vec<(&str, &V)> {
        let mut entries: Vec<(&str, &V)> = self
            .lru
            .iter()
            .map(|(k, slot)| (k.as_str(), &slot.value))
            .collect();
        entries.sort_unstable_by(|a, b| a.0.cmp(b.0));
        entries
    }

    pub fn clear(&mut self) {
        self.lru.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_dirty_evictions_are_returned() {
        let mut c = WriteBackCache::new(2);
        assert!(c.put("a".into(), 1, false).is_none());
        assert!(c.put("b".into(), 2, true).is_none());
        // "a" is least recent and clean.
        assert!(c.put("c".into(), 3, true).is_none());
        // "b" is now least recent and dirty.
        assert_eq!(c.put("d".into(), 4, true), Some(("b".to_string(), 2)));
    }

    #[test]
    fn replacing_a_key_is_not_an_eviction() {
        let mut c = WriteBackCache::new(1);
        c.put("a".into(), 1, true);
        assert!(c.put("a".into(), 2, true).is_none());
        assert_eq!(c.get("a"), Some(&2));
    }

    #[test]
    fn drain_marks_entries_clean() {
        let mut c = WriteBackCache::new(4);
        c.put("x".into(), 1, true);
        c.put("y".into(), 2, false);
        let mut seen = Vec::new();
        c.drain_dirty::<()>(|k, v| {
            seen.push((k.to_string(), *v));
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, vec![("x".to_string(), 1)]);

        let mut again = 0;
        c.drain_dirty::<()>(|_, _| {
            again += 1;
            Ok(())
        })
        .unwrap();
        assert_eq!(again, 0);
        assert_eq!(c.sorted().iter().map(|e| e.0).collect::<Vec<_>>(), ["x", "y"]);
    }
}
