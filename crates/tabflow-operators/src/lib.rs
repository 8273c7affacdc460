#![forbid(unsafe_code)]
//! tabflow-operators: the processors a flow is built from.
//!
//! Design intent:
//! - Every processor works in two phases: `process_package` fixes the
//!   descriptor before any row is read, `process_resources` wires lazy row
//!   streams.
//! - Anything that needs more than O(1) rows (sort, join, dedup, duplicate)
//!   goes through a `tabflow-store` store scoped to one invocation.
//! - Cross-stream dependencies share state behind a mutex; the dependent
//!   stream drains what is left of its source on first pull.

pub mod key;
pub mod traits;

pub mod computed;
pub mod concat;
pub mod dedup;
pub mod delete;
pub mod delete_fields;
pub mod duplicate;
pub mod filter;
pub mod func;
pub mod join;
pub mod load;
pub mod primary_key;
pub mod printer;
pub mod sort;
pub mod update;
pub mod validate;

pub use computed::{AddComputedField, ComputedField, Operation};
pub use concat::Concatenate;
pub use dedup::Deduplicate;
pub use delete::DeleteResource;
pub use delete_fields::DeleteFields;
pub use duplicate::Duplicate;
pub use filter::FilterRows;
pub use func::{package_processor, row_processor, rows_processor};
pub use join::{Aggregator, FieldSpec, Join, JoinMode};
pub use key::KeySpec;
pub use load::Load;
pub use primary_key::SetPrimaryKey;
pub use printer::Printer;
pub use sort::SortRows;
pub use traits::{Processor, ProcessorContext};
pub use update::{AddMetadata, UpdateResource};
pub use validate::Validate;
