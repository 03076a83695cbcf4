//! The `ItemExecutor` trait: the contract every project item must fulfil.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::resource::{ItemInputs, Resource};
use crate::write::{WriteGuard, WriteTicket};
use crate::ItemError;

/// Which output stream a line of item output came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Receiver of the lines an item prints while it runs.
///
/// The engine implements this on top of its event stream so item output is
/// sequenced together with state transitions.
pub trait OutputSink: Send + Sync {
    fn line(&self, node_id: &str, stream: OutputStream, line: &str);
}

/// An `OutputSink` that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardOutput;

impl OutputSink for DiscardOutput {
    fn line(&self, _node_id: &str, _stream: OutputStream, _line: &str) {}
}

/// What an item factory gets to build one item instance.
#[derive(Debug, Clone, Copy)]
pub struct ItemSpec<'a> {
    pub node_id: &'a str,
    pub config: &'a Value,
    /// Directory relative paths in the configuration are resolved against.
    pub work_dir: &'a Path,
}

impl ItemSpec<'_> {
    /// Resolve a configured path against the run's working directory.
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.work_dir.join(path)
        }
    }

    /// Deserialize the node configuration into an item-specific struct.
    pub fn parse_config<T: serde::de::DeserializeOwned>(&self) -> Result<T, ItemError> {
        let config = match self.config {
            Value::Null => Value::Object(Default::default()),
            other => other.clone(),
        };
        serde_json::from_value(config)
            .map_err(|e| ItemError::Config(format!("node '{}': {e}", self.node_id)))
    }
}

/// Per-execution context passed to `prepare` and `execute`.
///
/// Cheap to clone; every clone shares the same cancellation token, output
/// sink and write tickets.
#[derive(Clone)]
pub struct ItemContext {
    pub run_id: Uuid,
    pub node_id: String,
    /// Loop iteration this execution belongs to (0 outside loops).
    pub iteration: u32,
    pub work_dir: PathBuf,
    /// Fires when the run is being stopped.
    pub cancel: CancellationToken,
    output: Arc<dyn OutputSink>,
    writes: BTreeMap<String, Arc<WriteTicket>>,
}

impl ItemContext {
    pub fn new(
        run_id: Uuid,
        node_id: impl Into<String>,
        work_dir: impl Into<PathBuf>,
        cancel: CancellationToken,
        output: Arc<dyn OutputSink>,
    ) -> Self {
        Self {
            run_id,
            node_id: node_id.into(),
            iteration: 0,
            work_dir: work_dir.into(),
            cancel,
            output,
            writes: BTreeMap::new(),
        }
    }

    pub fn with_iteration(mut self, iteration: u32) -> Self {
        self.iteration = iteration;
        self
    }

    /// Attach the write tickets of this node's links into sinks, keyed by sink id.
    pub fn with_write_tickets(mut self, writes: BTreeMap<String, Arc<WriteTicket>>) -> Self {
        self.writes = writes;
        self
    }

    pub fn stdout(&self, line: &str) {
        self.output.line(&self.node_id, OutputStream::Stdout, line);
    }

    pub fn stderr(&self, line: &str) {
        self.output.line(&self.node_id, OutputStream::Stderr, line);
    }

    pub fn emit(&self, stream: OutputStream, line: &str) {
        self.output.line(&self.node_id, stream, line);
    }

    /// Wait for the write turn on every linked sink, in sink id order.
    pub async fn begin_all_writes(&self) -> Result<Vec<WriteGuard>, ItemError> {
        let mut guards = Vec::with_capacity(self.writes.len());
        for ticket in self.writes.values() {
            guards.push(ticket.acquire(&self.cancel).await?);
        }
        Ok(guards)
    }
}

/// What `prepare` resolved for `execute`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub program: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub inputs: ItemInputs,
    /// Item-specific extras.
    #[serde(default)]
    pub payload: Value,
}

impl ExecutionPlan {
    /// A plan that only carries the inputs.
    pub fn from_inputs(inputs: ItemInputs) -> Self {
        Self {
            inputs,
            ..Self::default()
        }
    }
}

/// What `execute` reports back to the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Process-style exit status, when the item has one.
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub output: Value,
}

impl ExecutionResult {
    pub fn success() -> Self {
        Self::default()
    }

    pub fn with_exit_code(code: i32) -> Self {
        Self {
            exit_code: Some(code),
            output: Value::Null,
        }
    }
}

/// The core item trait.
///
/// The engine only ever talks to items through this trait; concrete item
/// kinds are looked up in an [`ItemRegistry`](crate::ItemRegistry).
#[async_trait]
pub trait ItemExecutor: Send + Sync {
    /// The registry kind this item was built from.
    fn kind(&self) -> &str;

    /// Whether executing occupies a process slot.
    fn uses_process_slot(&self) -> bool {
        true
    }

    /// Whether executing occupies a persistent console slot.
    fn uses_console_slot(&self) -> bool {
        false
    }

    /// Resources offered to direct predecessors before the run starts.
    fn upstream_resources(&self) -> Vec<Resource> {
        Vec::new()
    }

    /// Resolve the inputs into an execution plan.
    async fn prepare(&self, inputs: ItemInputs, ctx: &ItemContext)
        -> Result<ExecutionPlan, ItemError>;

    /// Run the plan. Must return promptly once `ctx.cancel` fires.
    async fn execute(
        &self,
        plan: ExecutionPlan,
        ctx: &ItemContext,
    ) -> Result<ExecutionResult, ItemError>;

    /// Cooperative stop hook, called alongside cancelling the token.
    fn stop(&self) {}

    /// Resources for direct successors. Only called after a successful `execute`.
    fn advertise_resources(&self, result: &ExecutionResult) -> Vec<Resource>;

    /// Clear the item's destination before the first ordered write of a run.
    async fn purge(&self) -> Result<(), ItemError> {
        Ok(())
    }
}
