//! `engine` crate: DAG model, validation, resource filtering, events and the execution engine.

pub mod models;
pub mod error;
pub mod dag;
pub mod events;
pub mod filter;
pub mod slots;
pub mod executor;

pub use models::{DagDocument, FilterConfig, LinkDefinition, LinkKind, NodeDefinition, RunSettings, SlotLimit};
pub use error::{EngineError, FilterError, ValidationError, ValidationErrors};
pub use dag::Graph;
pub use events::{Event, EventKind, EventStream, NodeState, RunState};
pub use filter::{apply_link_filter, FilteredResources};
pub use executor::{ExecutorConfig, PreparedRun, RunOutcome, WorkflowExecutor};

#[cfg(test)]
mod executor_tests;
