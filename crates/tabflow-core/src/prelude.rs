//! Convenient re-exports for downstream crates.

pub use crate::cast::{BasicCaster, Caster, OnError};
pub use crate::catalog::ResourceCatalog;
pub use crate::config::{FlowConfig, StoreBackendKind, StoreOptions};
pub use crate::duration::IsoDuration;
pub use crate::error::{CastError, Error, Result};
pub use crate::matcher::ResourceMatcher;
pub use crate::row;
pub use crate::row::Row;
pub use crate::schema::{FieldDescriptor, PackageDescriptor, ResourceDescriptor, Schema};
pub use crate::stream::{DataStream, ResourceStream, RowStream, Stats};
pub use crate::value::{DateTimeValue, Value};
