//! `nodes` crate: the `ItemExecutor` contract and the reference item kinds.
//!
//! Every item kind must implement [`ItemExecutor`]. The engine crate looks
//! kinds up in an [`ItemRegistry`] and dispatches execution through the trait
//! object; it never depends on a concrete item.

pub mod error;
pub mod file_set;
pub mod file_sink;
pub mod mock;
pub mod process;
pub mod registry;
pub mod resource;
pub mod traits;
pub mod write;

pub use error::ItemError;
pub use registry::{ItemFactory, ItemRegistry};
pub use resource::{AppliedFilter, FilterType, ItemInputs, Resource, ResourceKind};
pub use traits::{
    DiscardOutput, ExecutionPlan, ExecutionResult, ItemContext, ItemExecutor, ItemSpec,
    OutputSink, OutputStream,
};
pub use write::{WriteGate, WriteGuard, WriteTicket};
