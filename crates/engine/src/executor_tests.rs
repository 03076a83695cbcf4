//! Integration tests for the workflow execution engine.
//!
//! These tests script every node with `MockItem` from the `nodes` crate, so
//! no external program is spawned. Time is paused where items sleep; tokio
//! advances the clock whenever every task is idle.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use nodes::mock::{ConcurrencyGauge, Journal, MockItem, MockScript};
use nodes::{FilterType, ItemError, ItemExecutor, ItemRegistry, Resource};
use tokio_util::sync::CancellationToken;

use crate::events::{Event, EventKind, EventStream, NodeState, RunState};
use crate::executor::{ExecutorConfig, RunOutcome, WorkflowExecutor};
use crate::models::{
    DagDocument, FilterConfig, LinkDefinition, NodeDefinition, RunSettings, SlotLimit,
};
use crate::ValidationError;

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// Scripted mocks registered under the `mock` kind, keyed by node id.
struct Harness {
    journal: Journal,
    gauge: Arc<ConcurrencyGauge>,
    mocks: HashMap<String, Arc<MockItem>>,
    settings: RunSettings,
    config: ExecutorConfig,
}

impl Harness {
    fn new() -> Self {
        Self {
            journal: Journal::default(),
            gauge: Arc::new(ConcurrencyGauge::default()),
            mocks: HashMap::new(),
            settings: RunSettings::default(),
            config: ExecutorConfig::default(),
        }
    }

    fn mock(mut self, id: &str, script: MockScript) -> Self {
        let item = MockItem::new(id, script)
            .with_journal(self.journal.clone())
            .with_gauge(Arc::clone(&self.gauge));
        self.mocks.insert(id.to_owned(), Arc::new(item));
        self
    }

    fn ok(self, id: &str) -> Self {
        self.mock(id, MockScript::default())
    }

    fn processes(mut self, limit: SlotLimit) -> Self {
        self.settings.max_concurrent_processes = limit;
        self
    }

    fn consoles(mut self, limit: SlotLimit) -> Self {
        self.settings.max_open_consoles = limit;
        self
    }

    fn grace(mut self, grace: Duration) -> Self {
        self.config.stop_grace = grace;
        self
    }

    fn item(&self, id: &str) -> &MockItem {
        &self.mocks[id]
    }

    fn executor(&self) -> WorkflowExecutor {
        let mocks = self.mocks.clone();
        let mut registry = ItemRegistry::new();
        registry.register("mock", move |spec| {
            mocks
                .get(spec.node_id)
                .map(|m| Arc::clone(m) as Arc<dyn ItemExecutor>)
                .ok_or_else(|| ItemError::Config(format!("no mock scripted for '{}'", spec.node_id)))
        });
        WorkflowExecutor::new(registry, self.config.clone())
    }

    fn document(&self, links: Vec<LinkDefinition>) -> DagDocument {
        let mut ids: Vec<&String> = self.mocks.keys().collect();
        ids.sort();
        let nodes = ids
            .into_iter()
            .map(|id| NodeDefinition::new(id.as_str(), "mock"))
            .collect();
        DagDocument::new(nodes, links).with_settings(self.settings)
    }

    async fn run(&self, links: Vec<LinkDefinition>) -> (RunOutcome, Vec<Event>) {
        self.run_stopped_after(links, None).await
    }

    async fn run_stopped_after(
        &self,
        links: Vec<LinkDefinition>,
        stop_after: Option<Duration>,
    ) -> (RunOutcome, Vec<Event>) {
        let executor = self.executor();
        let prepared = executor
            .prepare(&self.document(links), std::env::temp_dir())
            .expect("document should validate");
        let (events, mut rx) = EventStream::channel(prepared.run_id());

        let stop = CancellationToken::new();
        if let Some(delay) = stop_after {
            let stop = stop.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                stop.cancel();
            });
        }

        let outcome = executor.run(prepared, events, stop).await.expect("run");
        let mut log = Vec::new();
        while let Ok(event) = rx.try_recv() {
            log.push(event);
        }
        (outcome, log)
    }
}

fn link(from: &str, to: &str) -> LinkDefinition {
    LinkDefinition::new(from, to)
}

fn writer(delay_ms: u64) -> MockScript {
    MockScript {
        write: true,
        write_ms: 10,
        delay_ms,
        ..MockScript::default()
    }
}

fn state(outcome: &RunOutcome, id: &str) -> NodeState {
    outcome.node_states[id]
}

fn message_for(log: &[Event], node: &str, wanted: NodeState) -> Option<String> {
    log.iter().find_map(|event| match &event.kind {
        EventKind::NodeState {
            node_id,
            state,
            message,
            ..
        } if node_id == node && *state == wanted => message.clone(),
        _ => None,
    })
}

// ============================================================
// Failure handling
// ============================================================

#[tokio::test]
async fn failed_node_skips_descendants_and_spares_other_branches() {
    // a → b → c, with a failing; d is independent.
    let h = Harness::new()
        .mock("a", MockScript::failing("boom"))
        .ok("b")
        .ok("c")
        .ok("d");
    let (outcome, log) = h.run(vec![link("a", "b"), link("b", "c")]).await;

    assert_eq!(outcome.state, RunState::Failed);
    assert_eq!(state(&outcome, "a"), NodeState::Failed);
    assert_eq!(state(&outcome, "b"), NodeState::Skipped);
    assert_eq!(state(&outcome, "c"), NodeState::Skipped);
    assert_eq!(state(&outcome, "d"), NodeState::Succeeded);
    assert_eq!(h.item("b").execution_count(), 0);
    assert!(message_for(&log, "a", NodeState::Failed).unwrap().contains("boom"));
}

#[tokio::test]
async fn non_zero_exit_fails_an_ordinary_node() {
    let h = Harness::new().mock("a", MockScript::exit_codes([2])).ok("b");
    let (outcome, log) = h.run(vec![link("a", "b")]).await;

    assert_eq!(outcome.state, RunState::Failed);
    assert_eq!(state(&outcome, "b"), NodeState::Skipped);
    assert_eq!(
        message_for(&log, "a", NodeState::Failed).as_deref(),
        Some("exited with status 2")
    );
}

#[tokio::test]
async fn preparation_error_fails_without_execute() {
    let h = Harness::new().mock(
        "a",
        MockScript {
            fail_prepare: Some("missing input".into()),
            ..MockScript::default()
        },
    );
    let (outcome, _) = h.run(vec![]).await;
    assert_eq!(state(&outcome, "a"), NodeState::Failed);
    assert_eq!(h.item("a").prepare_count(), 1);
    assert_eq!(h.item("a").execution_count(), 0);
}

#[tokio::test]
async fn panicking_item_fails_and_releases_its_slot() {
    let h = Harness::new()
        .mock(
            "a",
            MockScript {
                panic: true,
                ..MockScript::default()
            },
        )
        .ok("b")
        .processes(SlotLimit::Fixed(1));
    let (outcome, log) = h.run(vec![]).await;

    assert_eq!(state(&outcome, "a"), NodeState::Failed);
    assert_eq!(state(&outcome, "b"), NodeState::Succeeded);
    assert!(message_for(&log, "a", NodeState::Failed)
        .unwrap()
        .contains("panicked on purpose"));
}

// ============================================================
// Loops
// ============================================================

#[tokio::test]
async fn loop_body_reruns_until_condition_exits_non_zero() {
    // a → cond ⟲ a, cond → after
    let h = Harness::new()
        .ok("a")
        .mock("cond", MockScript::exit_codes([0, 0, 1]))
        .ok("after");
    let (outcome, log) = h
        .run(vec![
            link("a", "cond"),
            LinkDefinition::looping("cond", "a"),
            link("cond", "after"),
        ])
        .await;

    assert_eq!(outcome.state, RunState::Succeeded);
    assert_eq!(h.item("a").execution_count(), 3);
    assert_eq!(h.item("cond").execution_count(), 3);
    assert_eq!(h.item("after").execution_count(), 1);
    assert_eq!(outcome.executions["a"], 3);

    let passes: Vec<u32> = log
        .iter()
        .filter_map(|e| match e.kind {
            EventKind::LoopIteration { iteration, .. } => Some(iteration),
            _ => None,
        })
        .collect();
    assert_eq!(passes, vec![1, 2]);

    // `after` only starts once the loop is done.
    let last_cond = h.journal.entries().iter().rposition(|e| e == "end:cond").unwrap();
    assert!(h.journal.position("start:after").unwrap() > last_cond);
}

#[tokio::test(start_paused = true)]
async fn loop_successor_waiting_for_a_slot_waits_for_the_next_pass() {
    // a → cond ⟲ a, a → d; `d` is ready after the first pass of `a` but the
    // only console is held by `hog` until `a` has been reset and restarted.
    let console = |delay_ms| MockScript {
        console: true,
        process: false,
        delay_ms,
        ..MockScript::default()
    };
    let h = Harness::new()
        .mock("a", MockScript::delayed(50))
        .mock("cond", MockScript::exit_codes([0, 1]))
        .mock("d", console(0))
        .mock("hog", console(70))
        .consoles(SlotLimit::Fixed(1));
    let (outcome, _) = h
        .run(vec![
            link("a", "cond"),
            LinkDefinition::looping("cond", "a"),
            link("a", "d"),
        ])
        .await;

    assert_eq!(outcome.state, RunState::Succeeded);
    assert_eq!(outcome.executions["a"], 2);
    assert_eq!(outcome.executions["d"], 1);
    let entries = h.journal.entries();
    let last_a = entries.iter().rposition(|e| e == "end:a").unwrap();
    assert!(
        h.journal.position("start:d").unwrap() > last_a,
        "d ran against a stale pass of a: {entries:?}"
    );
}

#[tokio::test]
async fn condition_without_exit_status_proceeds() {
    let h = Harness::new().ok("a").ok("cond").ok("after");
    let (outcome, _) = h
        .run(vec![
            link("a", "cond"),
            LinkDefinition::looping("cond", "a"),
            link("cond", "after"),
        ])
        .await;
    assert_eq!(outcome.state, RunState::Succeeded);
    assert_eq!(h.item("a").execution_count(), 1);
}

#[tokio::test]
async fn non_zero_condition_status_is_not_a_failure() {
    let h = Harness::new()
        .ok("a")
        .mock("cond", MockScript::exit_codes([7]))
        .ok("after");
    let (outcome, _) = h
        .run(vec![
            link("a", "cond"),
            LinkDefinition::looping("cond", "a"),
            link("cond", "after"),
        ])
        .await;
    assert_eq!(outcome.state, RunState::Succeeded);
    assert_eq!(state(&outcome, "after"), NodeState::Succeeded);
}

// ============================================================
// Write ordering and purge
// ============================================================

async fn assert_index_order(delay_w0: u64, delay_w1: u64) {
    let h = Harness::new()
        .mock("w0", writer(delay_w0))
        .mock("w1", writer(delay_w1))
        .ok("sink");
    let (outcome, _) = h
        .run(vec![
            link("w0", "sink").with_write_index(0),
            link("w1", "sink").with_write_index(1),
        ])
        .await;

    assert_eq!(outcome.state, RunState::Succeeded);
    let done_0 = h.journal.position("write-end->sink:w0").unwrap();
    let begin_1 = h.journal.position("write-begin->sink:w1").unwrap();
    assert!(done_0 < begin_1, "{:?}", h.journal.entries());
}

#[tokio::test(start_paused = true)]
async fn lower_write_index_lands_first_when_it_is_ready_first() {
    assert_index_order(0, 50).await;
}

#[tokio::test(start_paused = true)]
async fn higher_write_index_waits_when_it_is_ready_first() {
    assert_index_order(50, 0).await;
}

#[tokio::test(start_paused = true)]
async fn skipped_lower_index_writer_does_not_block_the_sink() {
    // `pre` fails, so w0 never runs; w1 must still get its turn.
    let h = Harness::new()
        .mock("pre", MockScript::failing("nope"))
        .mock("w0", writer(0))
        .mock("w1", writer(0))
        .ok("sink");
    let (outcome, _) = h
        .run(vec![
            link("pre", "w0"),
            link("w0", "sink").with_write_index(0),
            link("w1", "sink").with_write_index(1),
        ])
        .await;

    assert_eq!(state(&outcome, "w0"), NodeState::Skipped);
    assert_eq!(state(&outcome, "w1"), NodeState::Succeeded);
    assert_eq!(state(&outcome, "sink"), NodeState::Skipped);
}

#[tokio::test(start_paused = true)]
async fn purge_runs_once_before_the_first_write() {
    let mut purging = link("w0", "sink").with_write_index(0);
    purging.filter.purge_before_write = true;
    let h = Harness::new()
        .mock("w0", writer(0))
        .mock("w1", writer(0))
        .ok("sink");
    h.run(vec![purging, link("w1", "sink").with_write_index(1)]).await;

    let entries = h.journal.entries();
    assert_eq!(entries.iter().filter(|e| *e == "purge:sink").count(), 1);
    assert!(
        h.journal.position("purge:sink").unwrap()
            < h.journal.position("write-begin->sink:w0").unwrap()
    );
}

#[tokio::test(start_paused = true)]
async fn purge_is_rearmed_for_every_loop_pass() {
    // w ⟲ cond with w also writing into sink.
    let mut purging = link("w", "sink");
    purging.filter.purge_before_write = true;
    let h = Harness::new()
        .mock("w", writer(0))
        .mock("cond", MockScript::exit_codes([0, 1]))
        .ok("sink");
    let (outcome, _) = h
        .run(vec![
            link("w", "cond"),
            LinkDefinition::looping("cond", "w"),
            purging,
        ])
        .await;

    assert_eq!(outcome.state, RunState::Succeeded);
    assert_eq!(h.item("w").execution_count(), 2);
    let purges = h
        .journal
        .entries()
        .iter()
        .filter(|e| *e == "purge:sink")
        .count();
    assert_eq!(purges, 2);
}

// ============================================================
// Resources and filters
// ============================================================

fn scenario_db(label: &str, tags: &[&str]) -> Resource {
    Resource::database("src", label, format!("sqlite:///{label}.sqlite"))
        .with_tags(FilterType::Scenario, tags.iter().copied())
}

#[tokio::test]
async fn resources_cross_links_filtered_and_upstream_resources_reach_writers() {
    let h = Harness::new()
        .mock(
            "src",
            MockScript {
                resources: vec![scenario_db("base", &["base"]), scenario_db("high", &["high"])],
                ..MockScript::default()
            },
        )
        .mock(
            "dst",
            MockScript {
                upstream: vec![Resource::file("dst", "out", "/tmp/out.csv")],
                ..MockScript::default()
            },
        );
    let filtered = link("src", "dst").with_filter(FilterConfig {
        selected: Some(BTreeSet::from(["base".to_owned()])),
        ..FilterConfig::default()
    });
    let (outcome, _) = h.run(vec![filtered]).await;
    assert_eq!(outcome.state, RunState::Succeeded);

    let inputs = h.item("dst").last_inputs().unwrap();
    let labels: Vec<&str> = inputs.forward.iter().map(|r| r.label.as_str()).collect();
    assert_eq!(labels, vec!["base"]);

    let src_inputs = h.item("src").last_inputs().unwrap();
    assert_eq!(src_inputs.backward, vec![Resource::file("dst", "out", "/tmp/out.csv")]);
}

#[tokio::test]
async fn empty_filter_with_validation_fails_target_without_execute() {
    let h = Harness::new()
        .mock(
            "src",
            MockScript {
                resources: vec![scenario_db("base", &["base"])],
                ..MockScript::default()
            },
        )
        .ok("dst")
        .ok("after");
    let strict = link("src", "dst").with_filter(FilterConfig {
        selected: Some(BTreeSet::from(["other".to_owned()])),
        filter_validation: true,
        ..FilterConfig::default()
    });
    let (outcome, log) = h.run(vec![strict, link("dst", "after")]).await;

    assert_eq!(outcome.state, RunState::Failed);
    assert_eq!(state(&outcome, "dst"), NodeState::Failed);
    assert_eq!(state(&outcome, "after"), NodeState::Skipped);
    assert_eq!(h.item("dst").execution_count(), 0);
    assert_eq!(outcome.executions["dst"], 0);
    assert!(message_for(&log, "dst", NodeState::Failed)
        .unwrap()
        .contains("selects no scenario"));
}

#[tokio::test]
async fn auto_included_filters_are_returned_with_the_outcome() {
    let h = Harness::new()
        .mock(
            "src",
            MockScript {
                resources: vec![scenario_db("base", &["base"]), scenario_db("new", &["new"])],
                ..MockScript::default()
            },
        )
        .ok("dst");
    let auto = link("src", "dst").with_filter(FilterConfig {
        selected: Some(BTreeSet::from(["base".to_owned()])),
        known_filters: BTreeSet::from(["base".to_owned()]),
        check_new_filters_automatically: true,
        ..FilterConfig::default()
    });
    let (outcome, log) = h.run(vec![auto]).await;

    let updated = &outcome.links[0].filter;
    let both = BTreeSet::from(["base".to_owned(), "new".to_owned()]);
    assert_eq!(updated.selected.as_ref(), Some(&both));
    assert_eq!(updated.known_filters, both);
    assert_eq!(h.item("dst").last_inputs().unwrap().forward.len(), 2);
    assert!(log.iter().any(|e| matches!(
        &e.kind,
        EventKind::FilterSelectionUpdated { added, .. } if added.contains("new")
    )));
}

// ============================================================
// Slot budgets
// ============================================================

#[tokio::test(start_paused = true)]
async fn single_process_slot_runs_one_node_at_a_time() {
    // a1 → a2 and b1 → b2
    let h = Harness::new()
        .mock("a1", MockScript::delayed(10))
        .mock("a2", MockScript::delayed(10))
        .mock("b1", MockScript::delayed(10))
        .mock("b2", MockScript::delayed(10))
        .processes(SlotLimit::Fixed(1));
    let (outcome, _) = h.run(vec![link("a1", "a2"), link("b1", "b2")]).await;

    assert_eq!(outcome.state, RunState::Succeeded);
    assert_eq!(h.gauge.peak(), 1);
    assert!(outcome.node_states.values().all(|s| *s == NodeState::Succeeded));
}

#[tokio::test(start_paused = true)]
async fn unlimited_slots_run_independent_nodes_together() {
    let h = Harness::new()
        .mock("a", MockScript::delayed(10))
        .mock("b", MockScript::delayed(10))
        .mock("c", MockScript::delayed(10))
        .processes(SlotLimit::Unlimited);
    h.run(vec![]).await;
    assert_eq!(h.gauge.peak(), 3);
}

#[tokio::test(start_paused = true)]
async fn console_budget_is_independent_of_process_budget() {
    let console = || MockScript {
        console: true,
        process: false,
        delay_ms: 10,
        ..MockScript::default()
    };
    let h = Harness::new()
        .mock("c1", console())
        .mock("c2", console())
        .mock("c3", console())
        .processes(SlotLimit::Fixed(1))
        .consoles(SlotLimit::Fixed(1));
    let (outcome, _) = h.run(vec![]).await;
    assert_eq!(outcome.state, RunState::Succeeded);
    assert_eq!(h.gauge.peak(), 1);
}

#[tokio::test(start_paused = true)]
async fn busy_slot_kind_does_not_hold_back_other_ready_nodes() {
    // "a-console" sorts first but its only console slot is taken by "a-busy".
    let h = Harness::new()
        .mock(
            "a-busy",
            MockScript {
                console: true,
                process: false,
                delay_ms: 100,
                ..MockScript::default()
            },
        )
        .mock(
            "a-console",
            MockScript {
                console: true,
                process: false,
                ..MockScript::default()
            },
        )
        .mock("b-plain", MockScript::default())
        .consoles(SlotLimit::Fixed(1));
    h.run(vec![]).await;

    let plain = h.journal.position("end:b-plain").unwrap();
    let busy = h.journal.position("end:a-busy").unwrap();
    assert!(plain < busy, "{:?}", h.journal.entries());
}

#[tokio::test]
async fn ready_nodes_dispatch_in_rank_then_id_order() {
    let h = Harness::new()
        .ok("zeta")
        .ok("alpha")
        .ok("mid")
        .processes(SlotLimit::Fixed(1));
    h.run(vec![]).await;
    let starts: Vec<String> = h
        .journal
        .entries()
        .into_iter()
        .filter(|e| e.starts_with("start:"))
        .collect();
    assert_eq!(starts, vec!["start:alpha", "start:mid", "start:zeta"]);
}

// ============================================================
// Cancellation
// ============================================================

#[tokio::test(start_paused = true)]
async fn stop_request_cancels_running_and_skips_the_rest() {
    let h = Harness::new()
        .mock("slow", MockScript::delayed(60_000))
        .ok("next")
        .grace(Duration::from_secs(1));
    let (outcome, log) = h
        .run_stopped_after(vec![link("slow", "next")], Some(Duration::from_millis(50)))
        .await;

    assert_eq!(outcome.state, RunState::Cancelled);
    assert_eq!(state(&outcome, "slow"), NodeState::Stopped);
    assert_eq!(state(&outcome, "next"), NodeState::Skipped);

    let stopping = log
        .iter()
        .position(|e| matches!(e.kind, EventKind::RunStopping))
        .unwrap();
    let node_stopping = log
        .iter()
        .position(|e| e.node_state() == Some(("slow", NodeState::Stopping)))
        .unwrap();
    assert!(stopping < node_stopping);
}

#[tokio::test(start_paused = true)]
async fn item_ignoring_stop_is_forced_after_grace() {
    let h = Harness::new()
        .mock(
            "stubborn",
            MockScript {
                delay_ms: 600_000,
                ignore_stop: true,
                ..MockScript::default()
            },
        )
        .grace(Duration::from_millis(100));
    let started = tokio::time::Instant::now();
    let (outcome, log) = h
        .run_stopped_after(vec![], Some(Duration::from_millis(10)))
        .await;

    assert_eq!(outcome.state, RunState::Cancelled);
    assert_eq!(state(&outcome, "stubborn"), NodeState::Stopped);
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(message_for(&log, "stubborn", NodeState::Stopped)
        .unwrap()
        .contains("grace"));
}

#[tokio::test]
async fn stop_before_start_runs_nothing() {
    let h = Harness::new().ok("a");
    let executor = h.executor();
    let prepared = executor.prepare(&h.document(vec![]), std::env::temp_dir()).unwrap();
    let stop = CancellationToken::new();
    stop.cancel();
    let outcome = executor
        .run(prepared, EventStream::discard(uuid::Uuid::nil()), stop)
        .await
        .unwrap();
    assert_eq!(outcome.state, RunState::Cancelled);
    assert_eq!(state(&outcome, "a"), NodeState::Skipped);
    assert_eq!(h.item("a").execution_count(), 0);
}

// ============================================================
// Events and validation
// ============================================================

#[tokio::test]
async fn event_stream_is_sequenced_and_bracketed() {
    let h = Harness::new()
        .mock(
            "a",
            MockScript {
                output: vec!["hello".into()],
                ..MockScript::default()
            },
        )
        .ok("b");
    let (outcome, log) = h.run(vec![link("a", "b")]).await;

    let seqs: Vec<u64> = log.iter().map(|e| e.seq).collect();
    assert_eq!(seqs, (1..=log.len() as u64).collect::<Vec<_>>());
    assert!(matches!(log.first().unwrap().kind, EventKind::RunStarted { nodes: 2 }));
    assert!(matches!(
        log.last().unwrap().kind,
        EventKind::RunFinished { state: RunState::Succeeded }
    ));
    assert!(log.iter().all(|e| e.run_id == outcome.run_id));
    assert!(log.iter().any(|e| matches!(
        &e.kind,
        EventKind::NodeOutput { node_id, line, .. } if node_id == "a" && line == "hello"
    )));

    let a_states: Vec<NodeState> = log
        .iter()
        .filter_map(|e| e.node_state().filter(|(id, _)| *id == "a").map(|(_, s)| s))
        .collect();
    assert_eq!(
        a_states,
        vec![NodeState::Ready, NodeState::Running, NodeState::Succeeded]
    );
}

#[test]
fn prepare_reports_every_problem_at_once() {
    let h = Harness::new().ok("a").processes(SlotLimit::Fixed(0));
    let mut document = h.document(vec![link("a", "ghost")]);
    document.nodes.push(NodeDefinition::new("b", "teleporter"));

    let errors = h
        .executor()
        .prepare(&document, std::env::temp_dir())
        .unwrap_err();
    assert!(errors
        .iter()
        .any(|e| matches!(e, ValidationError::DanglingReference { .. })));
    assert!(errors
        .iter()
        .any(|e| matches!(e, ValidationError::UnknownKind { kind, .. } if kind == "teleporter")));
    assert!(errors.iter().any(|e| matches!(
        e,
        ValidationError::InvalidSetting { setting: "max_concurrent_processes", .. }
    )));
}

#[test]
fn item_configuration_errors_are_validation_errors() {
    let executor = WorkflowExecutor::new(ItemRegistry::with_builtins(), ExecutorConfig::default());
    let document = DagDocument::new(
        vec![NodeDefinition::new("p", "process").with_config(serde_json::json!({ "args": [] }))],
        vec![],
    );
    let errors = executor.prepare(&document, std::env::temp_dir()).unwrap_err();
    assert!(matches!(
        &errors.0[..],
        [ValidationError::ItemConfig { node_id, .. }] if node_id == "p"
    ));
}

#[tokio::test]
async fn registry_built_mocks_run_from_document_config() {
    let executor = WorkflowExecutor::new(ItemRegistry::with_builtins(), ExecutorConfig::default());
    let document: DagDocument = serde_json::from_value(serde_json::json!({
        "nodes": [
            { "id": "a", "kind": "mock" },
            { "id": "cond", "kind": "mock", "config": { "exit_codes": [0, 1] } }
        ],
        "links": [
            { "source": "a", "target": "cond" },
            { "source": "cond", "target": "a", "kind": "loop" }
        ]
    }))
    .unwrap();
    let outcome = executor
        .run_document(&document, std::env::temp_dir())
        .await
        .unwrap();
    assert_eq!(outcome.state, RunState::Succeeded);
    assert_eq!(outcome.executions["a"], 2);
}

#[test]
fn stop_grace_reads_from_environment() {
    std::env::set_var(crate::executor::STOP_GRACE_ENV, "250");
    let config = ExecutorConfig::from_env();
    std::env::remove_var(crate::executor::STOP_GRACE_ENV);
    assert_eq!(config.stop_grace, Duration::from_millis(250));
}
