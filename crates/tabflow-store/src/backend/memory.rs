use std::collections::BTreeMap;
use std::ops::Bound;

use super::{Backend, Entry};
use crate::error::Result;

/// In-process backend over a `BTreeMap`.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    map: BTreeMap<String, Vec<u8>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Backend for MemoryBackend {
    fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.map.get(key).cloned())
    }

    fn put_batch(&mut self, entries: Vec<Entry>) -> Result<()> {
        self.map.extend(entries);
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<()> {
        self.map.remove(key);
        Ok(())
    }

    fn scan(&mut self, after: Option<&str>, reverse: bool, limit: usize) -> Result<Vec<Entry>> {
        let clone = |(k, v): (&String, &Vec<u8>)| (k.clone(), v.clone());
        let page = match (after, reverse) {
            (None, false) => self.map.iter().take(limit).map(clone).collect(),
            (None, true) => self.map.iter().rev().take(limit).map(clone).collect(),
            (Some(a), false) => self
                .map
                .range::<str, _>((Bound::Excluded(a), Bound::Unbounded))
                .take(limit)
                .map(clone)
                .collect(),
            (Some(a), true) => self
                .map
                .range::<str, _>((Bound::Unbounded, Bound::Excluded(a)))
                .rev()
                .take(limit)
                .map(clone)
                .collect(),
        };
        Ok(page)
    }

    fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
