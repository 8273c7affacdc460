#![forbid(unsafe_code)]
//! tabflow-core: values, rows, descriptors and streams shared by every
//! tabflow crate.
//!
//! Nothing here performs I/O or spawns threads. The store, the processors and
//! the flow runner build on these types.

pub mod cast;
pub mod catalog;
pub mod config;
pub mod duration;
pub mod error;
pub mod matcher;
pub mod prelude;
pub mod row;
pub mod schema;
pub mod stream;
pub mod value;

pub use config::{FlowConfig, StoreBackendKind, StoreOptions};
pub use error::{CastError, Error, Result};
pub use row::Row;
pub use value::Value;
