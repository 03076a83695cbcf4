//! `MockItem`: a scriptable test double for `ItemExecutor`.
//!
//! Useful in unit and integration tests where a real item implementation is
//! either unavailable or irrelevant. The `mock` registry kind builds one from
//! the node configuration, so remote tests can script items too.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::registry::ItemRegistry;
use crate::resource::{ItemInputs, Resource};
use crate::traits::{ExecutionPlan, ExecutionResult, ItemContext, ItemExecutor};
use crate::ItemError;

/// Behaviour injected into `MockItem` at construction time.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MockScript {
    /// Exit codes reported by successive executions; the last one repeats.
    pub exit_codes: Vec<i32>,
    /// Fail `execute` with this message.
    pub fail: Option<String>,
    /// Fail `prepare` with this message.
    pub fail_prepare: Option<String>,
    /// Simulated work before any write.
    pub delay_ms: u64,
    /// Time spent holding each write turn.
    pub write_ms: u64,
    /// Acquire the write turn on every linked sink.
    pub write: bool,
    /// Lines printed to stdout.
    pub output: Vec<String>,
    pub resources: Vec<Resource>,
    pub upstream: Vec<Resource>,
    pub process: bool,
    pub console: bool,
    /// Keep working after the cancellation token fires.
    pub ignore_stop: bool,
    pub panic: bool,
}

impl Default for MockScript {
    fn default() -> Self {
        Self {
            exit_codes: Vec::new(),
            fail: None,
            fail_prepare: None,
            delay_ms: 0,
            write_ms: 0,
            write: false,
            output: Vec::new(),
            resources: Vec::new(),
            upstream: Vec::new(),
            process: true,
            console: false,
            ignore_stop: false,
            panic: false,
        }
    }
}

impl MockScript {
    pub fn exit_codes(codes: impl Into<Vec<i32>>) -> Self {
        Self {
            exit_codes: codes.into(),
            ..Self::default()
        }
    }

    pub fn failing(msg: impl Into<String>) -> Self {
        Self {
            fail: Some(msg.into()),
            ..Self::default()
        }
    }

    pub fn delayed(delay_ms: u64) -> Self {
        Self {
            delay_ms,
            ..Self::default()
        }
    }
}

/// Shared, ordered record of what mock items did.
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn record(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    /// Position of the first entry equal to `entry`.
    pub fn position(&self, entry: &str) -> Option<usize> {
        self.0.lock().unwrap().iter().position(|e| e == entry)
    }
}

/// Tracks how many mock items are inside `execute` at the same time.
#[derive(Debug, Default)]
pub struct ConcurrencyGauge {
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl ConcurrencyGauge {
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn enter(self: &Arc<Self>) -> GaugeGuard {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        GaugeGuard(Arc::clone(self))
    }
}

struct GaugeGuard(Arc<ConcurrencyGauge>);

impl Drop for GaugeGuard {
    fn drop(&mut self) {
        self.0.running.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A mock item that records every call it receives and behaves as scripted.
pub struct MockItem {
    node_id: String,
    script: MockScript,
    exit_codes: Mutex<VecDeque<i32>>,
    /// Inputs seen by `prepare`, in call order.
    calls: Mutex<Vec<ItemInputs>>,
    executions: AtomicUsize,
    journal: Option<Journal>,
    gauge: Option<Arc<ConcurrencyGauge>>,
}

impl MockItem {
    pub fn new(node_id: impl Into<String>, script: MockScript) -> Self {
        let exit_codes = script.exit_codes.iter().copied().collect();
        Self {
            node_id: node_id.into(),
            script,
            exit_codes: Mutex::new(exit_codes),
            calls: Mutex::new(Vec::new()),
            executions: AtomicUsize::new(0),
            journal: None,
            gauge: None,
        }
    }

    /// A mock that always succeeds without an exit code.
    pub fn succeeding(node_id: impl Into<String>) -> Self {
        Self::new(node_id, MockScript::default())
    }

    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn with_gauge(mut self, gauge: Arc<ConcurrencyGauge>) -> Self {
        self.gauge = Some(gauge);
        self
    }

    /// Number of times `execute` was entered.
    pub fn execution_count(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }

    /// Number of times `prepare` was entered.
    pub fn prepare_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Inputs handed to the latest `prepare`.
    pub fn last_inputs(&self) -> Option<ItemInputs> {
        self.calls.lock().unwrap().last().cloned()
    }

    fn note(&self, what: &str) {
        if let Some(journal) = &self.journal {
            journal.record(format!("{what}:{}", self.node_id));
        }
    }

    fn next_exit_code(&self) -> Option<i32> {
        let mut codes = self.exit_codes.lock().unwrap();
        if codes.len() > 1 {
            codes.pop_front()
        } else {
            codes.front().copied()
        }
    }

    async fn pause(&self, ms: u64, ctx: &ItemContext) -> Result<(), ItemError> {
        if ms == 0 {
            return Ok(());
        }
        let sleep = tokio::time::sleep(Duration::from_millis(ms));
        if self.script.ignore_stop {
            sleep.await;
            return Ok(());
        }
        tokio::select! {
            _ = sleep => Ok(()),
            _ = ctx.cancel.cancelled() => Err(ItemError::Cancelled),
        }
    }
}

#[async_trait]
impl ItemExecutor for MockItem {
    fn kind(&self) -> &str {
        "mock"
    }

    fn uses_process_slot(&self) -> bool {
        self.script.process
    }

    fn uses_console_slot(&self) -> bool {
        self.script.console
    }

    fn upstream_resources(&self) -> Vec<Resource> {
        self.script.upstream.clone()
    }

    async fn prepare(
        &self,
        inputs: ItemInputs,
        _ctx: &ItemContext,
    ) -> Result<ExecutionPlan, ItemError> {
        self.calls.lock().unwrap().push(inputs.clone());
        if let Some(msg) = &self.script.fail_prepare {
            return Err(ItemError::Preparation(msg.clone()));
        }
        Ok(ExecutionPlan::from_inputs(inputs))
    }

    async fn execute(
        &self,
        _plan: ExecutionPlan,
        ctx: &ItemContext,
    ) -> Result<ExecutionResult, ItemError> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        let _gauge = self.gauge.as_ref().map(|gauge| gauge.enter());
        self.note("start");

        for line in &self.script.output {
            ctx.stdout(line);
        }
        self.pause(self.script.delay_ms, ctx).await?;

        if self.script.write {
            let guards = ctx.begin_all_writes().await?;
            for guard in &guards {
                self.note(&format!("write-begin->{}", guard.sink_id()));
            }
            self.pause(self.script.write_ms, ctx).await?;
            for guard in guards {
                self.note(&format!("write-end->{}", guard.sink_id()));
                guard.finish();
            }
        }

        if self.script.panic {
            panic!("mock item '{}' panicked on purpose", self.node_id);
        }
        if let Some(msg) = &self.script.fail {
            self.note("fail");
            return Err(ItemError::Execution(msg.clone()));
        }

        self.note("end");
        Ok(ExecutionResult {
            exit_code: self.next_exit_code(),
            output: json!({ "node": self.node_id }),
        })
    }

    fn advertise_resources(&self, _result: &ExecutionResult) -> Vec<Resource> {
        self.script.resources.clone()
    }

    async fn purge(&self) -> Result<(), ItemError> {
        self.note("purge");
        Ok(())
    }
}

/// Register the `mock` kind, building items from their node configuration.
pub fn register(registry: &mut ItemRegistry) {
    registry.register("mock", |spec| {
        let script: MockScript = spec.parse_config()?;
        Ok(Arc::new(MockItem::new(spec.node_id, script)) as Arc<dyn ItemExecutor>)
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::DiscardOutput;
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    fn ctx(node_id: &str) -> ItemContext {
        ItemContext::new(
            Uuid::new_v4(),
            node_id,
            std::env::temp_dir(),
            CancellationToken::new(),
            Arc::new(DiscardOutput),
        )
    }

    #[tokio::test]
    async fn exit_codes_are_consumed_then_last_repeats() {
        let item = MockItem::new("cond", MockScript::exit_codes([0, 0, 1]));
        let ctx = ctx("cond");
        let mut seen = Vec::new();
        for _ in 0..4 {
            let result = item.execute(ExecutionPlan::default(), &ctx).await.unwrap();
            seen.push(result.exit_code);
        }
        assert_eq!(seen, vec![Some(0), Some(0), Some(1), Some(1)]);
        assert_eq!(item.execution_count(), 4);
    }

    #[tokio::test]
    async fn failing_prepare_is_a_preparation_error() {
        let item = MockItem::new(
            "a",
            MockScript {
                fail_prepare: Some("no inputs".into()),
                ..MockScript::default()
            },
        );
        let result = item.prepare(ItemInputs::default(), &ctx("a")).await;
        assert!(matches!(result, Err(ItemError::Preparation(_))));
        assert_eq!(item.prepare_count(), 1);
    }

    #[tokio::test]
    async fn cancellation_interrupts_delay() {
        let item = MockItem::new("slow", MockScript::delayed(60_000));
        let ctx = ctx("slow");
        ctx.cancel.cancel();
        let result = item.execute(ExecutionPlan::default(), &ctx).await;
        assert!(matches!(result, Err(ItemError::Cancelled)));
    }

    #[test]
    fn script_parses_from_config() {
        let registry = {
            let mut r = ItemRegistry::new();
            register(&mut r);
            r
        };
        let config = json!({ "exit_codes": [0, 1], "console": true });
        let spec = crate::ItemSpec {
            node_id: "m",
            config: &config,
            work_dir: std::path::Path::new("."),
        };
        let item = registry.instantiate("mock", &spec).unwrap();
        assert!(item.uses_console_slot());
        assert!(item.uses_process_slot());
    }
}
