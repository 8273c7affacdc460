#![forbid(unsafe_code)]
//! tabflow-exec: flows, stage wiring, checkpoints and parallel row execution.
//!
//! A [`Flow`] is flattened into a processor chain (sub-flows inlined,
//! checkpoints resolved), then every stage runs its metadata phase and wires
//! its row streams in order. Nothing is pulled until the caller drains the
//! resulting [`DataStream`](tabflow_core::stream::DataStream).

pub mod checkpoint;
pub mod dump;
pub mod flow;
pub mod ndjson;
pub mod parallel;
mod stage;

pub use checkpoint::Checkpoint;
pub use dump::DumpToPath;
pub use flow::{Flow, FlowResults};
pub use ndjson::{DumpNdjson, LoadNdjson};
pub use parallel::Parallelize;
