//! Set of string keys that spills to an [`OrderedStore`] past a threshold.

use std::collections::HashSet;

use tabflow_core::config::StoreOptions;

use crate::error::Result;
use crate::store::OrderedStore;

pub struct KeySet {
    memory: HashSet<String>,
    limit: usize,
    options: StoreOptions,
    spill: Option<OrderedStore<()>>,
}

impl KeySet {
    pub fn new(limit: usize, options: StoreOptions) -> Self {
        Self {
            memory: HashSet::new(),
            limit,
            options,
            spill: None,
        }
    }

    pub fn is_spilled(&self) -> bool {
        self.spill.is_some()
    }

    fn spill_over(&mut self) -> Result<&mut OrderedStore<()>> {
        if self.spill.is_none() {
            #[cfg(feature = "tracing")]
            tracing::debug!(keys = self.memory.len(), "key set spilling to store");
            let mut store = OrderedStore::new(self.options.clone());
            let batch_size = self.options.batch_size;
            store.insert_all(self.memory.drain().map(|k| (k, ())), batch_size)?;
            self.spill = Some(store);
        }
        self.spill.as_mut().ok_or(crate::error::Error::Closed)
    }

    pub fn contains(&mut self, key: &str) -> Result<bool> {
        match self.spill.as_mut() {
            Some(store) => Ok(store.get(key)?.is_some()),
            None => Ok(self.memory.contains(key)),
        }
    }

    /// Add `key`. Returns `true` if it was not present before.
    pub fn insert(&mut self, key: String) -> Result<bool> {
        if self.spill.is_none() {
            if self.memory.contains(&key) {
                return Ok(false);
            }
            if self.memory.len() < self.limit {
                self.memory.insert(key);
                return Ok(true);
            }
        }
        let store = self.spill_over()?;
        if store.get(&key)?.is_some() {
            return Ok(false);
        }
        store.set(key, ())?;
        Ok(true)
    }
}
