#![forbid(unsafe_code)]
//! tabflow: lazy, composable pipelines over tabular data.
//!
//! A [`Flow`] chains processors. Each processor first rewrites the package
//! descriptor, then wires lazy row streams; rows are only pulled when the
//! flow is drained. Sort, join, dedup and duplicate spill into an ordered
//! key-value store, so resources larger than memory are fine.
//!
//! ```no_run
//! use tabflow::prelude::*;
//!
//! let results = Flow::new()
//!     .step(Load::rows(vec![row! { "a" => 3 }, row! { "a" => 1 }]).name("nums"))
//!     .step(SortRows::new("{a}"))
//!     .results()?;
//! assert_eq!(results.resources[0][0], row! { "a" => 1 });
//! # Ok::<(), tabflow::Error>(())
//! ```

pub use tabflow_core as core;
pub use tabflow_exec as exec;
pub use tabflow_operators as operators;
pub use tabflow_store as store;

pub use tabflow_core::{Error, FlowConfig, Result, Row, Value};

pub mod prelude {
    pub use tabflow_core::prelude::*;
    pub use tabflow_exec::{
        Checkpoint, DumpNdjson, DumpToPath, Flow, FlowResults, LoadNdjson, Parallelize,
    };
    pub use tabflow_operators::{
        package_processor, row_processor, rows_processor, AddComputedField, AddMetadata,
        Aggregator, ComputedField, Concatenate, Deduplicate, DeleteFields, DeleteResource,
        Duplicate, FieldSpec, FilterRows, Join, JoinMode, KeySpec, Load, Operation, Printer,
        Processor, ProcessorContext, SetPrimaryKey, SortRows, UpdateResource, Validate,
    };
}
