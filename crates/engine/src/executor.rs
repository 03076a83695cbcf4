//! Workflow execution engine.
//!
//! `WorkflowExecutor` is the central orchestrator:
//! 1. Validates the DAG document and instantiates one item per node.
//! 2. Runs a single coordinator per run that dispatches ready nodes into
//!    worker tasks, bounded by the run's process and console slot budgets.
//! 3. Routes advertised resources through the resource filter layer.
//! 4. Re-runs loop bodies while their condition exits with status 0.
//! 5. Skips the descendants of failed nodes and keeps independent branches
//!    going; nothing is retried.
//! 6. On a stop request, cancels running nodes and forces the ones that
//!    outlive the grace period.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use nodes::{
    ExecutionResult, ItemContext, ItemError, ItemExecutor, ItemInputs, ItemRegistry, ItemSpec,
    Resource, WriteGate, WriteTicket,
};

use crate::dag::Graph;
use crate::error::{EngineError, ValidationError, ValidationErrors};
use crate::events::{EventKind, EventStream, NodeState, RunState};
use crate::filter::apply_link_filter;
use crate::models::{DagDocument, LinkDefinition, RunSettings, SlotLimit};
use crate::slots::{SlotBudget, SlotPermits};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Environment variable overriding [`ExecutorConfig::stop_grace`], in milliseconds.
pub const STOP_GRACE_ENV: &str = "ENGINE_STOP_GRACE_MS";

/// Tuning knobs for the executor.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// How long a stopped node may keep running before it is forcibly terminated.
    pub stop_grace: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            stop_grace: Duration::from_secs(5),
        }
    }
}

impl ExecutorConfig {
    /// Defaults, overridden by `ENGINE_STOP_GRACE_MS` when set.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(raw) = std::env::var(STOP_GRACE_ENV) {
            match raw.trim().parse::<u64>() {
                Ok(ms) => config.stop_grace = Duration::from_millis(ms),
                Err(e) => warn!("ignoring {STOP_GRACE_ENV}={raw:?}: {e}"),
            }
        }
        config
    }
}

// ---------------------------------------------------------------------------
// Prepared runs and outcomes
// ---------------------------------------------------------------------------

/// A validated submission with its items instantiated, ready to run once.
pub struct PreparedRun {
    run_id: Uuid,
    graph: Graph,
    items: HashMap<String, Arc<dyn ItemExecutor>>,
    settings: RunSettings,
    work_dir: PathBuf,
}

impl PreparedRun {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }
}

impl std::fmt::Debug for PreparedRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedRun")
            .field("run_id", &self.run_id)
            .field("nodes", &self.graph.len())
            .field("settings", &self.settings)
            .field("work_dir", &self.work_dir)
            .finish_non_exhaustive()
    }
}

/// The result of running a full workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub run_id: Uuid,
    pub state: RunState,
    /// Final state of every node.
    pub node_states: BTreeMap<String, NodeState>,
    /// How many times each node was handed to `execute`.
    pub executions: BTreeMap<String, u32>,
    /// Link configurations after the run, including auto-included filters.
    pub links: Vec<LinkDefinition>,
}

// ---------------------------------------------------------------------------
// WorkflowExecutor
// ---------------------------------------------------------------------------

/// Validates and runs DAG submissions against a registry of item kinds.
///
/// Construct one executor per process and share it; every run gets its own
/// slot budgets, coordinator and event stream.
#[derive(Debug, Clone)]
pub struct WorkflowExecutor {
    registry: Arc<ItemRegistry>,
    config: ExecutorConfig,
}

impl WorkflowExecutor {
    /// Create a new executor.
    pub fn new(registry: ItemRegistry, config: ExecutorConfig) -> Self {
        Self::with_shared_registry(Arc::new(registry), config)
    }

    pub fn with_shared_registry(registry: Arc<ItemRegistry>, config: ExecutorConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &ItemRegistry {
        &self.registry
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// The same registry with different tuning.
    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    /// Validate `document` and instantiate its items, resolving relative
    /// paths against `work_dir`.
    ///
    /// # Errors
    /// Every graph, kind, item configuration and settings problem at once.
    pub fn prepare(
        &self,
        document: &DagDocument,
        work_dir: impl Into<PathBuf>,
    ) -> Result<PreparedRun, ValidationErrors> {
        let work_dir = work_dir.into();
        let mut errors = ValidationErrors::default();

        for (setting, limit) in [
            ("max_concurrent_processes", document.settings.max_concurrent_processes),
            ("max_open_consoles", document.settings.max_open_consoles),
        ] {
            if limit == SlotLimit::Fixed(0) {
                errors.push(ValidationError::InvalidSetting {
                    setting,
                    message: "must be at least 1, \"auto\" or \"unlimited\"".to_owned(),
                });
            }
        }

        let graph = Graph::build(document.nodes.clone(), document.links.clone());

        let mut items: HashMap<String, Arc<dyn ItemExecutor>> = HashMap::new();
        for node in &document.nodes {
            if items.contains_key(&node.id) {
                continue;
            }
            if !self.registry.contains(&node.kind) {
                errors.push(ValidationError::UnknownKind {
                    node_id: node.id.clone(),
                    kind: node.kind.clone(),
                });
                continue;
            }
            let spec = ItemSpec {
                node_id: &node.id,
                config: &node.config,
                work_dir: &work_dir,
            };
            match self.registry.instantiate(&node.kind, &spec) {
                Ok(item) => {
                    items.insert(node.id.clone(), item);
                }
                Err(e) => errors.push(ValidationError::ItemConfig {
                    node_id: node.id.clone(),
                    message: match e {
                        ItemError::Config(message) => message,
                        other => other.to_string(),
                    },
                }),
            }
        }

        let graph = match graph {
            Ok(graph) => {
                errors.into_result()?;
                graph
            }
            Err(mut graph_errors) => {
                graph_errors.0.extend(errors.0);
                return Err(graph_errors);
            }
        };

        Ok(PreparedRun {
            run_id: Uuid::new_v4(),
            graph,
            items,
            settings: document.settings,
            work_dir,
        })
    }

    /// Validate without keeping the instantiated items.
    pub fn validate(
        &self,
        document: &DagDocument,
        work_dir: impl Into<PathBuf>,
    ) -> Result<(), ValidationErrors> {
        self.prepare(document, work_dir).map(drop)
    }

    /// Prepare and run `document` with no event receiver and no stop source.
    pub async fn run_document(
        &self,
        document: &DagDocument,
        work_dir: impl Into<PathBuf>,
    ) -> Result<RunOutcome, EngineError> {
        let prepared = self.prepare(document, work_dir)?;
        let events = EventStream::discard(prepared.run_id());
        self.run(prepared, events, CancellationToken::new()).await
    }

    /// Run a prepared submission to completion.
    ///
    /// Node failures do not make this return an error: they are part of the
    /// outcome. Cancelling `stop` stops the run; the outcome is then
    /// [`RunState::Cancelled`].
    ///
    /// # Errors
    /// [`EngineError::Internal`] if a worker task could not be joined.
    #[instrument(skip_all, fields(run_id = %prepared.run_id, nodes = prepared.graph.len()))]
    pub async fn run(
        &self,
        prepared: PreparedRun,
        events: EventStream,
        stop: CancellationToken,
    ) -> Result<RunOutcome, EngineError> {
        info!("run started");
        let mut run = Coordinator::new(&prepared, events, self.config.stop_grace);
        run.events.emit(EventKind::RunStarted {
            nodes: prepared.graph.len(),
        });
        run.promote_roots();

        let mut tasks: JoinSet<(String, NodeOutcome)> = JoinSet::new();
        loop {
            if !run.stopping && stop.is_cancelled() {
                run.begin_stop();
            }
            if !run.stopping {
                run.dispatch(&mut tasks);
            }
            if tasks.is_empty() {
                break;
            }

            tokio::select! {
                biased;
                _ = stop.cancelled(), if !run.stopping => {}
                joined = tasks.join_next() => match joined {
                    Some(Ok((node_id, outcome))) => run.complete(&node_id, outcome),
                    Some(Err(e)) => {
                        error!("worker task lost: {e}");
                        run.release_all_tickets();
                        return Err(EngineError::Internal(format!("worker task lost: {e}")));
                    }
                    None => break,
                },
            }
        }

        Ok(run.finish())
    }
}

// ---------------------------------------------------------------------------
// Worker side
// ---------------------------------------------------------------------------

/// How a worker task ended.
enum NodeOutcome {
    Finished(Result<ExecutionResult, ItemError>),
    Panicked(String),
    /// Still running when the stop grace period ran out.
    Forced,
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "item panicked".to_owned())
}

/// Prepare and execute one node, honouring the stop grace period.
async fn supervise(
    item: Arc<dyn ItemExecutor>,
    inputs: ItemInputs,
    ctx: ItemContext,
    grace: Duration,
) -> NodeOutcome {
    let cancel = ctx.cancel.clone();
    let work = AssertUnwindSafe(async move {
        let plan = item.prepare(inputs, &ctx).await?;
        item.execute(plan, &ctx).await
    })
    .catch_unwind();
    tokio::pin!(work);

    let finished = tokio::select! {
        result = &mut work => result,
        _ = cancel.cancelled() => match tokio::time::timeout(grace, &mut work).await {
            Ok(result) => result,
            // Dropping `work` tears the item down; spawned children die with it.
            Err(_) => return NodeOutcome::Forced,
        },
    };
    match finished {
        Ok(result) => NodeOutcome::Finished(result),
        Err(payload) => NodeOutcome::Panicked(panic_message(payload)),
    }
}

// ---------------------------------------------------------------------------
// Coordinator side
// ---------------------------------------------------------------------------

struct RunningNode {
    cancel: CancellationToken,
    item: Arc<dyn ItemExecutor>,
}

/// Mutable bookkeeping of one run, owned by the coordinator.
struct Coordinator<'a> {
    run_id: Uuid,
    graph: &'a Graph,
    items: &'a HashMap<String, Arc<dyn ItemExecutor>>,
    work_dir: &'a Path,
    grace: Duration,
    events: EventStream,
    slots: SlotBudget,
    links: Vec<LinkDefinition>,
    states: HashMap<String, NodeState>,
    iterations: HashMap<String, u32>,
    loop_passes: HashMap<String, u32>,
    executions: BTreeMap<String, u32>,
    /// Resources advertised by succeeded nodes.
    resources: HashMap<String, Vec<Resource>>,
    /// Resources offered upstream, collected once per run.
    upstream: HashMap<String, Vec<Resource>>,
    gates: HashMap<String, Arc<WriteGate>>,
    /// Current write tickets, writer → sink → ticket.
    tickets: HashMap<String, BTreeMap<String, Arc<WriteTicket>>>,
    ready: BTreeSet<(usize, String)>,
    running: HashMap<String, RunningNode>,
    failed: bool,
    stopping: bool,
}

impl<'a> Coordinator<'a> {
    fn new(prepared: &'a PreparedRun, events: EventStream, grace: Duration) -> Self {
        let graph = &prepared.graph;
        let mut gates = HashMap::new();
        let mut upstream = HashMap::new();
        for node in graph.nodes() {
            let item = &prepared.items[&node.id];
            if !graph.direct_predecessors(&node.id).is_empty() {
                gates.insert(node.id.clone(), WriteGate::new(&node.id, Arc::clone(item)));
            }
            upstream.insert(node.id.clone(), item.upstream_resources());
        }

        let mut run = Self {
            run_id: prepared.run_id,
            graph,
            items: &prepared.items,
            work_dir: &prepared.work_dir,
            grace,
            events,
            slots: SlotBudget::new(&prepared.settings),
            links: graph.links().to_vec(),
            states: graph
                .nodes()
                .map(|n| (n.id.clone(), NodeState::Pending))
                .collect(),
            iterations: HashMap::new(),
            loop_passes: HashMap::new(),
            executions: graph.nodes().map(|n| (n.id.clone(), 0)).collect(),
            resources: HashMap::new(),
            upstream,
            gates,
            tickets: HashMap::new(),
            ready: BTreeSet::new(),
            running: HashMap::new(),
            failed: false,
            stopping: false,
        };
        // Every ticket exists before the first dispatch so no writer can
        // slip in ahead of a lower-index one that has not started yet.
        let writers: Vec<String> = graph.nodes().map(|n| n.id.clone()).collect();
        for writer in &writers {
            run.register_tickets(writer);
        }
        run
    }

    fn state(&self, id: &str) -> NodeState {
        self.states.get(id).copied().unwrap_or(NodeState::Pending)
    }

    fn iteration(&self, id: &str) -> u32 {
        self.iterations.get(id).copied().unwrap_or(0)
    }

    fn set_state(&mut self, id: &str, state: NodeState, message: Option<String>) {
        self.states.insert(id.to_owned(), state);
        self.events.node_state(id, state, self.iteration(id), message);
    }

    // -----------------------------------------------------------------------
    // Write tickets
    // -----------------------------------------------------------------------

    fn register_tickets(&mut self, writer: &str) {
        let mut issued = BTreeMap::new();
        for link in self.graph.outgoing_links(writer) {
            if let Some(gate) = self.gates.get(&link.target) {
                issued.insert(
                    link.target.clone(),
                    gate.register(writer, link.filter.write_index, link.filter.purge_before_write),
                );
            }
        }
        self.tickets.insert(writer.to_owned(), issued);
    }

    fn release_tickets(&self, writer: &str) {
        for ticket in self.tickets.get(writer).into_iter().flat_map(BTreeMap::values) {
            ticket.release();
        }
    }

    fn release_all_tickets(&self) {
        for ticket in self.tickets.values().flat_map(BTreeMap::values) {
            ticket.release();
        }
    }

    // -----------------------------------------------------------------------
    // Readiness
    // -----------------------------------------------------------------------

    fn is_satisfied(&self, id: &str) -> bool {
        self.graph
            .direct_predecessors(id)
            .iter()
            .all(|p| self.state(p) == NodeState::Succeeded)
    }

    fn mark_ready(&mut self, id: &str) {
        self.set_state(id, NodeState::Ready, None);
        self.ready
            .insert((self.graph.dispatch_rank(id), id.to_owned()));
    }

    fn promote_roots(&mut self) {
        let roots: Vec<String> = self
            .graph
            .nodes()
            .filter(|n| self.graph.direct_predecessors(&n.id).is_empty())
            .map(|n| n.id.clone())
            .collect();
        for id in roots {
            self.mark_ready(&id);
        }
    }

    fn promote_successors(&mut self, id: &str) {
        let graph = self.graph;
        for next in graph.direct_successors(id) {
            if self.state(next) == NodeState::Pending && self.is_satisfied(next) {
                self.mark_ready(next);
            }
        }
    }

    fn skip_descendants(&mut self, id: &str) {
        for descendant in self.graph.descendants(id) {
            if matches!(self.state(&descendant), NodeState::Pending | NodeState::Ready) {
                self.ready
                    .remove(&(self.graph.dispatch_rank(&descendant), descendant.clone()));
                self.release_tickets(&descendant);
                self.set_state(
                    &descendant,
                    NodeState::Skipped,
                    Some(format!("upstream node '{id}' did not succeed")),
                );
            }
        }
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    /// Collect the filtered forward resources and the upstream resources of `id`.
    fn collect_inputs(&mut self, id: &str) -> Result<ItemInputs, String> {
        let graph = self.graph;
        let mut inputs = ItemInputs::default();
        for source in graph.direct_predecessors(id) {
            let Some(position) = graph.link_position(source, id) else {
                continue;
            };
            let offered = self.resources.get(source).cloned().unwrap_or_default();
            let link = &mut self.links[position];
            let filtered = apply_link_filter(link, &offered).map_err(|e| e.to_string())?;
            if !filtered.newly_included.is_empty() {
                info!(
                    source = %source, target = %id, added = ?filtered.newly_included,
                    "new filters included automatically"
                );
                self.events.emit(EventKind::FilterSelectionUpdated {
                    source: source.clone(),
                    target: id.to_owned(),
                    filter_type: link.filter.filter_type,
                    added: filtered.newly_included,
                });
            }
            inputs.forward.extend(filtered.resources);
        }
        for successor in graph.direct_successors(id) {
            if let Some(offered) = self.upstream.get(successor) {
                inputs.backward.extend(offered.iter().cloned());
            }
        }
        Ok(inputs)
    }

    /// Start every ready node whose slots are free, in `(rank, id)` order.
    fn dispatch(&mut self, tasks: &mut JoinSet<(String, NodeOutcome)>) {
        let candidates: Vec<(usize, String)> = self.ready.iter().cloned().collect();
        for key in candidates {
            let id = key.1.clone();
            // An earlier candidate of this pass may have failed or reset it.
            if !self.ready.contains(&key)
                || self.state(&id) != NodeState::Ready
                || !self.is_satisfied(&id)
            {
                continue;
            }
            let item = Arc::clone(&self.items[&id]);
            let Some(permits) = self
                .slots
                .try_acquire(item.uses_process_slot(), item.uses_console_slot())
            else {
                debug!(
                    node = %id,
                    free_processes = ?self.slots.available_processes(),
                    "no free slot, passing over"
                );
                continue;
            };
            self.ready.remove(&key);

            match self.collect_inputs(&id) {
                Ok(inputs) => self.start(&id, item, inputs, permits, tasks),
                Err(message) => {
                    warn!(node = %id, "{message}");
                    self.fail(&id, message);
                }
            }
        }
    }

    fn start(
        &mut self,
        id: &str,
        item: Arc<dyn ItemExecutor>,
        inputs: ItemInputs,
        permits: SlotPermits,
        tasks: &mut JoinSet<(String, NodeOutcome)>,
    ) {
        let cancel = CancellationToken::new();
        let ctx = ItemContext::new(
            self.run_id,
            id,
            self.work_dir,
            cancel.clone(),
            Arc::new(self.events.clone()),
        )
        .with_iteration(self.iteration(id))
        .with_write_tickets(self.tickets.get(id).cloned().unwrap_or_default());

        *self.executions.entry(id.to_owned()).or_default() += 1;
        self.running.insert(
            id.to_owned(),
            RunningNode {
                cancel,
                item: Arc::clone(&item),
            },
        );
        self.set_state(id, NodeState::Running, None);
        debug!(node = %id, kind = item.kind(), iteration = self.iteration(id), "node dispatched");

        let grace = self.grace;
        let node_id = id.to_owned();
        tasks.spawn(async move {
            let _permits = permits;
            let outcome = supervise(item, inputs, ctx, grace).await;
            (node_id, outcome)
        });
    }

    // -----------------------------------------------------------------------
    // Completion
    // -----------------------------------------------------------------------

    fn complete(&mut self, id: &str, outcome: NodeOutcome) {
        self.running.remove(id);
        self.release_tickets(id);
        let was_stopping = self.state(id) == NodeState::Stopping;

        match outcome {
            NodeOutcome::Finished(Ok(result)) => self.succeed_or_fail(id, result),
            NodeOutcome::Finished(Err(e)) if was_stopping => {
                info!(node = %id, "node stopped: {e}");
                self.set_state(id, NodeState::Stopped, Some(e.to_string()));
            }
            NodeOutcome::Finished(Err(e)) => {
                warn!(node = %id, "node failed: {e}");
                self.fail(id, e.to_string());
            }
            NodeOutcome::Panicked(message) => {
                error!(node = %id, "item panicked: {message}");
                self.fail(id, format!("item panicked: {message}"));
            }
            NodeOutcome::Forced => {
                warn!(node = %id, grace = ?self.grace, "node forcibly terminated");
                self.set_state(
                    id,
                    NodeState::Stopped,
                    Some(format!("terminated after {:?} stop grace period", self.grace)),
                );
            }
        }
    }

    fn succeed_or_fail(&mut self, id: &str, result: ExecutionResult) {
        if self.graph.is_loop_condition(id) {
            self.set_state(id, NodeState::Succeeded, None);
            if result.exit_code == Some(0) && !self.stopping {
                self.iterate_loop(id);
            } else if !self.stopping {
                self.promote_successors(id);
            }
            return;
        }

        match result.exit_code {
            Some(code) if code != 0 => {
                warn!(node = %id, code, "node exited with non-zero status");
                self.fail(id, format!("exited with status {code}"));
            }
            _ => {
                let item = &self.items[id];
                self.resources
                    .insert(id.to_owned(), item.advertise_resources(&result));
                info!(node = %id, "node succeeded");
                self.set_state(id, NodeState::Succeeded, None);
                if !self.stopping {
                    self.promote_successors(id);
                }
            }
        }
    }

    fn fail(&mut self, id: &str, message: String) {
        self.failed = true;
        self.release_tickets(id);
        self.set_state(id, NodeState::Failed, Some(message));
        self.skip_descendants(id);
    }

    /// Reset the loop body of `condition` for another pass.
    fn iterate_loop(&mut self, condition: &str) {
        let graph = self.graph;
        let Some(body) = graph.loop_body(condition) else {
            return;
        };
        let pass = {
            let pass = self.loop_passes.entry(condition.to_owned()).or_default();
            *pass += 1;
            *pass
        };
        info!(condition = %condition, iteration = pass, "loop condition requested another pass");
        self.events.emit(EventKind::LoopIteration {
            condition: condition.to_owned(),
            iteration: pass,
        });

        // Nodes waiting on a body node must wait for its next pass.
        let stale: Vec<(usize, String)> = self
            .ready
            .iter()
            .filter(|(_, id)| !body.contains(id) && !graph.ancestors(id).is_disjoint(body))
            .cloned()
            .collect();
        for key in stale {
            self.ready.remove(&key);
            debug!(node = %key.1, "waiting for the next loop pass");
            self.set_state(&key.1, NodeState::Pending, None);
        }

        for id in body {
            *self.iterations.entry(id.clone()).or_default() += 1;
            self.release_tickets(id);
            self.register_tickets(id);
            self.set_state(id, NodeState::Pending, None);
        }
        for id in body {
            if self.is_satisfied(id) {
                self.mark_ready(id);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Stop and finish
    // -----------------------------------------------------------------------

    fn begin_stop(&mut self) {
        info!(running = self.running.len(), "stop requested");
        self.stopping = true;
        self.events.emit(EventKind::RunStopping);

        let mut running: Vec<String> = self.running.keys().cloned().collect();
        running.sort();
        for id in running {
            self.set_state(&id, NodeState::Stopping, None);
            if let Some(node) = self.running.get(&id) {
                node.item.stop();
                node.cancel.cancel();
            }
        }
    }

    fn finish(mut self) -> RunOutcome {
        let leftovers: Vec<String> = self
            .graph
            .nodes()
            .filter(|n| !self.state(&n.id).is_terminal())
            .map(|n| n.id.clone())
            .collect();
        for id in leftovers {
            let message = if self.stopping {
                "run was stopped"
            } else {
                "never became ready"
            };
            self.set_state(&id, NodeState::Skipped, Some(message.to_owned()));
        }
        self.release_all_tickets();

        let state = if self.stopping {
            RunState::Cancelled
        } else if self.failed {
            RunState::Failed
        } else {
            RunState::Succeeded
        };
        info!(?state, "run finished");
        self.events.emit(EventKind::RunFinished { state });

        RunOutcome {
            run_id: self.run_id,
            state,
            node_states: self
                .states
                .iter()
                .map(|(id, state)| (id.clone(), *state))
                .collect(),
            executions: self.executions,
            links: self.links,
        }
    }
}
