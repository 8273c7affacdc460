//! `OrderedStore`: a transient, ordered key → value map that spills to disk.

use std::collections::{HashMap, VecDeque};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tabflow_core::config::StoreOptions;

use crate::backend::{self, Backend, Entry};
use crate::cache::WriteBackCache;
use crate::codec;
use crate::error::{Error, Result};

/// Ordered map from string keys to serializable values.
///
/// Writes land in an LRU cache first. Dirty entries evicted from the cache
/// are queued and written to the backend in batches; the backend itself is
/// only created on the first such write, so a store that never outgrows
/// its cache never touches disk. Iteration is in byte order of the key.
///
/// Stores are scoped to one processor invocation. Dropping a store closes
/// it and deletes its storage.
pub struct OrderedStore<V> {
    options: StoreOptions,
    cache: WriteBackCache<V>,
    /// Dirty evictions waiting for the next batch write.
    pending: HashMap<String, Vec<u8>>,
    backend: Option<Box<dyn Backend>>,
    closed: bool,
}

impl<V> OrderedStore<V>
where
    V: Serialize + DeserializeOwned + Clone,
{
    pub fn new(options: StoreOptions) -> Self {
        Self {
            cache: WriteBackCache::new(options.cache_size),
            options,
            pending: HashMap::new(),
            backend: None,
            closed: false,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(StoreOptions::in_memory())
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    /// Whether the store has created its backend.
    pub fn is_spilled(&self) -> bool {
        self.backend.is_some()
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            Err(Error::Closed)
        } else {
            Ok(())
        }
    }

    fn backend(&mut self) -> Result<&mut Box<dyn Backend>> {
        if self.backend.is_none() {
            self.backend = Some(backend::open(&self.options)?);
        }
        self.backend.as_mut().ok_or(Error::Closed)
    }

    fn write_batch(&mut self, batch: Vec<Entry>) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        #[cfg(feature = "tracing")]
        tracing::trace!(entries = batch.len(), "flushing store batch");
        self.backend()?.put_batch(batch)
    }

    fn flush_pending(&mut self) -> Result<()> {
        let batch: Vec<Entry> = self.pending.drain().collect();
        self.write_batch(batch)
    }

    /// Write every pending and dirty entry to the backend.
    pub fn flush(&mut self) -> Result<()> {
        self.check_open()?;
        self.flush_pending()?;
        let mut batch = Vec::new();
        self.cache.drain_dirty(|key, value| {
            batch.push((key.to_string(), codec::encode(value)?));
            Ok::<_, Error>(())
        })?;
        for chunk in chunked(batch, self.options.batch_size) {
            self.write_batch(chunk)?;
        }
        Ok(())
    }

    fn cache_put(&mut self, key: String, value: V, dirty: bool) -> Result<()> {
        if let Some((evicted_key, evicted)) = self.cache.put(key, value, dirty) {
            self.pending.insert(evicted_key, codec::encode(&evicted)?);
            if self.pending.len() >= self.options.batch_size {
                self.flush_pending()?;
            }
        }
        Ok(())
    }

    pub fn get(&mut self, key: &str) -> Result<Option<V>> {
        self.check_open()?;
        if let Some(v) = self.cache.get(key) {
            return Ok(Some(v.clone()));
        }
        let bytes = match self.pending.get(key) {
            Some(bytes) => Some(bytes.clone()),
            None => match self.backend.as_mut() {
                Some(b) => b.get(key)?,
                None => None,
            },
        };
        match bytes {
            Some(bytes) => {
                let value: V = codec::decode(&bytes)?;
                self.cache_put(key.to_string(), value.clone(), false)?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    pub fn set(&mut self, key: impl Into<String>, value: V) -> Result<()> {
        self.check_open()?;
        self.cache_put(key.into(), value, true)
    }

    pub fn delete(&mut self, key: &str) -> Result<()> {
        self.check_open()?;
        self.cache.remove(key);
        self.pending.remove(key);
        if let Some(b) = self.backend.as_mut() {
            b.delete(key)?;
        }
        Ok(())
    }

    /// Write `entries` straight to the backend in batches of `batch_size`,
    /// bypassing the cache. Returns the number of entries written. The first
    /// failing entry stops the insert.
    pub fn insert<I, E>(&mut self, entries: I, batch_size: usize) -> std::result::Result<usize, E>
    where
        I: IntoIterator<Item = std::result::Result<(String, V), E>>,
        E: From<Error>,
    {
        self.check_open()?;
        let batch_size = batch_size.max(1);
        let mut batch = Vec::with_capacity(batch_size);
        let mut count = 0;
        for entry in entries {
            let (key, value) = entry?;
            self.cache.remove(&key);
            self.pending.remove(&key);
            batch.push((key, codec::encode(&value)?));
            count += 1;
            if batch.len() >= batch_size {
                self.write_batch(std::mem::take(&mut batch))?;
            }
        }
        self.write_batch(batch)?;
        Ok(count)
    }

    /// Same as [`insert`](Self::insert) for sources that cannot fail.
    pub fn insert_all<I>(&mut self, entries: I, batch_size: usize) -> Result<usize>
    where
        I: IntoIterator<Item = (String, V)>,
    {
        self.insert(entries.into_iter().map(Ok::<_, Error>), batch_size)
    }

    fn scan_state(&mut self, reverse: bool) -> Result<ScanState<V>> {
        self.check_open()?;
        if self.backend.is_none() && self.pending.is_empty() {
            let mut snapshot: Vec<(String, V)> = self
                .cache
                .sorted()
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect();
            if reverse {
                snapshot.reverse();
            }
            return Ok(ScanState::Snapshot(snapshot.into_iter()));
        }
        self.flush()?;
        Ok(ScanState::Cursor(Cursor {
            reverse,
            last: None,
            page: VecDeque::new(),
            done: false,
            page_size: self.options.batch_size,
        }))
    }

    /// Every entry in key order (descending when `reverse`).
    pub fn items(&mut self, reverse: bool) -> Result<Items<'_, V>> {
        let state = self.scan_state(reverse)?;
        Ok(Items {
            store: self,
            state,
        })
    }

    /// Like [`items`](Self::items), but the iterator owns the store and
    /// closes it when dropped.
    pub fn into_items(mut self, reverse: bool) -> Result<IntoItems<V>> {
        let state = self.scan_state(reverse)?;
        Ok(IntoItems { store: self, state })
    }

    pub fn keys(&mut self, reverse: bool) -> Result<impl Iterator<Item = Result<String>> + '_> {
        Ok(self.items(reverse)?.map(|item| item.map(|(k, _)| k)))
    }

    /// Release the backend and delete its storage. Further calls fail with
    /// [`Error::Closed`].
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.cache.clear();
        self.pending.clear();
        match self.backend.take() {
            Some(b) => b.close(),
            None => Ok(()),
        }
    }
}

impl<V> Drop for OrderedStore<V> {
    fn drop(&mut self) {
        if let Some(b) = self.backend.take() {
            if let Err(_e) = b.close() {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %_e, "failed to close store backend");
            }
        }
    }
}

fn chunked(mut entries: Vec<Entry>, size: usize) -> Vec<Vec<Entry>> {
    let size = size.max(1);
    let mut out = Vec::with_capacity(entries.len() / size + 1);
    while entries.len() > size {
        let tail = entries.split_off(size);
        out.push(std::mem::replace(&mut entries, tail));
    }
    out.push(entries);
    out
}

struct Cursor {
    reverse: bool,
    last: Option<String>,
    page: VecDeque<Entry>,
    done: bool,
    page_size: usize,
}

impl Cursor {
    fn next_raw(&mut self, backend: &mut dyn Backend) -> Result<Option<Entry>> {
        if self.page.is_empty() && !self.done {
            let page = backend.scan(self.last.as_deref(), self.reverse, self.page_size)?;
            if page.len() < self.page_size {
                self.done = true;
            }
            self.page = page.into();
        }
        let next = self.page.pop_front();
        if let Some((key, _)) = &next {
            self.last = Some(key.clone());
        }
        Ok(next)
    }
}

enum ScanState<V> {
    Snapshot(std::vec::IntoIter<(String, V)>),
    Cursor(Cursor),
    Failed,
}

impl<V> ScanState<V>
where
    V: Serialize + DeserializeOwned + Clone,
{
    fn next(&mut self, store: &mut OrderedStore<V>) -> Option<Result<(String, V)>> {
        let step = match self {
            ScanState::Snapshot(it) => return it.next().map(Ok),
            ScanState::Failed => return None,
            ScanState::Cursor(cursor) => {
                if store.closed {
                    Err(Error::Closed)
                } else {
                    match store.backend.as_mut() {
                        Some(b) => cursor.next_raw(&mut **b),
                        None => Ok(None),
                    }
                }
            }
        };
        match step {
            Ok(Some((key, bytes))) => match codec::decode(&bytes) {
                Ok(value) => Some(Ok((key, value))),
                Err(e) => {
                    *self = ScanState::Failed;
                    Some(Err(e))
                }
            },
            Ok(None) => None,
            Err(e) => {
                *self = ScanState::Failed;
                Some(Err(e))
            }
        }
    }
}

/// Borrowing iterator returned by [`OrderedStore::items`].
pub struct Items<'a, V> {
    store: &'a mut OrderedStore<V>,
    state: ScanState<V>,
}

impl<V> Iterator for Items<'_, V>
where
    V: Serialize + DeserializeOwned + Clone,
{
    type Item = Result<(String, V)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.state.next(self.store)
    }
}

/// Owning iterator returned by [`OrderedStore::into_items`].
pub struct IntoItems<V> {
    store: OrderedStore<V>,
    state: ScanState<V>,
}

impl<V> Iterator for IntoItems<V>
where
    V: Serialize + DeserializeOwned + Clone,
{
    type Item = Result<(String, V)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.state.next(&mut self.store)
    }
}
