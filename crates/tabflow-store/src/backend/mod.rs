//! Persistent side of an [`OrderedStore`](crate::OrderedStore).
//!
//! Backends hold string keys mapped to opaque bytes and scan them in byte
//! order of the key. They only see entries the cache has flushed.

pub mod memory;
pub mod sqlite;

use tabflow_core::config::{StoreBackendKind, StoreOptions};

use crate::error::Result;

pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;

pub type Entry = (String, Vec<u8>);

pub trait Backend: Send {
    fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Insert or replace every entry. Either all entries land or none do.
    fn put_batch(&mut self, entries: Vec<Entry>) -> Result<()>;

    /// Idempotent: deleting a missing key is not an error.
    fn delete(&mut self, key: &str) -> Result<()>;

    /// Up to `limit` entries strictly after `after` in scan direction.
    fn scan(&mut self, after: Option<&str>, reverse: bool, limit: usize) -> Result<Vec<Entry>>;

    /// Release the backend and any storage behind it.
    fn close(self: Box<Self>) -> Result<()>;
}

pub fn open(options: &StoreOptions) -> Result<Box<dyn Backend>> {
    Ok(match options.backend {
        StoreBackendKind::Sqlite => Box::new(SqliteBackend::create(options.dir.as_deref())?),
        StoreBackendKind::Memory => Box::new(MemoryBackend::new()),
    })
}
