#![forbid(unsafe_code)]
//! tabflow-store: the ordered key-value store behind tabflow's out-of-core
//! processors.
//!
//! An [`OrderedStore`] keeps recently used entries in an LRU write-back cache
//! and spills the rest to a [`Backend`](backend::Backend): an embedded sqlite
//! database in a temporary directory, or an in-process ordered map. Stores
//! are transient and scoped to a single processor invocation.

pub mod backend;
mod cache;
pub mod codec;
pub mod error;
pub mod keyset;
pub mod store;

pub use backend::{Backend, MemoryBackend, SqliteBackend};
pub use error::{Error, Result};
pub use keyset::KeySet;
pub use store::{IntoItems, Items, OrderedStore};
