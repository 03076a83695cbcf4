//! The run's event stream.
//!
//! Every state transition, output line and run-level milestone becomes an
//! [`Event`] with a sequence number assigned at emission. Sequence numbers
//! are handed out and the event is queued under the same lock, so receivers
//! always see a gap-free, strictly increasing sequence.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use nodes::{FilterType, OutputSink, OutputStream};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// States
// ---------------------------------------------------------------------------

/// Per-run state of one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeState {
    Pending,
    Ready,
    Running,
    Stopping,
    Stopped,
    Succeeded,
    Failed,
    Skipped,
}

impl NodeState {
    /// No further transition happens in this run (or loop iteration).
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Stopped | Self::Succeeded | Self::Failed | Self::Skipped
        )
    }
}

/// Terminal state of a whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Succeeded,
    Failed,
    Cancelled,
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// One entry of the event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub run_id: Uuid,
    #[serde(flatten)]
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    RunStarted {
        nodes: usize,
    },
    NodeState {
        node_id: String,
        state: NodeState,
        iteration: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    NodeOutput {
        node_id: String,
        stream: OutputStream,
        line: String,
    },
    /// A loop condition asked for another pass over its body.
    LoopIteration {
        condition: String,
        iteration: u32,
    },
    /// Auto-include added tags to a link's selection.
    FilterSelectionUpdated {
        source: String,
        target: String,
        filter_type: FilterType,
        added: BTreeSet<String>,
    },
    RunStopping,
    RunFinished {
        state: RunState,
    },
}

impl Event {
    /// `(node_id, state)` when this is a node state transition.
    pub fn node_state(&self) -> Option<(&str, NodeState)> {
        match &self.kind {
            EventKind::NodeState { node_id, state, .. } => Some((node_id, *state)),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// EventStream
// ---------------------------------------------------------------------------

struct Emitter {
    next_seq: u64,
    tx: mpsc::UnboundedSender<Event>,
}

/// Sequenced event sink for one run. Clones share the sequence counter.
#[derive(Clone)]
pub struct EventStream {
    run_id: Uuid,
    inner: Arc<Mutex<Emitter>>,
}

impl EventStream {
    /// A stream for `run_id` and the receiver its events arrive on.
    pub fn channel(run_id: Uuid) -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let stream = Self {
            run_id,
            inner: Arc::new(Mutex::new(Emitter { next_seq: 1, tx })),
        };
        (stream, rx)
    }

    /// A stream whose events are numbered and then dropped.
    pub fn discard(run_id: Uuid) -> Self {
        Self::channel(run_id).0
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Emit an event and return its sequence number.
    ///
    /// A dropped receiver is not an error; the run carries on headless.
    pub fn emit(&self, kind: EventKind) -> u64 {
        let mut emitter = self
            .inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let seq = emitter.next_seq;
        emitter.next_seq += 1;
        let _ = emitter.tx.send(Event {
            seq,
            timestamp: Utc::now(),
            run_id: self.run_id,
            kind,
        });
        seq
    }

    pub fn node_state(&self, node_id: &str, state: NodeState, iteration: u32, message: Option<String>) {
        self.emit(EventKind::NodeState {
            node_id: node_id.to_owned(),
            state,
            iteration,
            message,
        });
    }
}

impl std::fmt::Debug for EventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream")
            .field("run_id", &self.run_id)
            .finish_non_exhaustive()
    }
}

impl OutputSink for EventStream {
    fn line(&self, node_id: &str, stream: OutputStream, line: &str) {
        self.emit(EventKind::NodeOutput {
            node_id: node_id.to_owned(),
            stream,
            line: line.to_owned(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sequence_is_gap_free_across_clones() {
        let (stream, mut rx) = EventStream::channel(Uuid::new_v4());
        let other = stream.clone();
        stream.emit(EventKind::RunStarted { nodes: 2 });
        other.line("a", OutputStream::Stdout, "hi");
        stream.emit(EventKind::RunStopping);

        let mut seqs = Vec::new();
        while let Ok(event) = rx.try_recv() {
            assert_eq!(event.run_id, stream.run_id());
            seqs.push(event.seq);
        }
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[test]
    fn emitting_without_receiver_still_counts() {
        let stream = EventStream::discard(Uuid::new_v4());
        assert_eq!(stream.emit(EventKind::RunStopping), 1);
        assert_eq!(stream.emit(EventKind::RunStopping), 2);
    }

    #[test]
    fn events_serialize_with_a_type_tag() {
        let event = Event {
            seq: 7,
            timestamp: Utc::now(),
            run_id: Uuid::nil(),
            kind: EventKind::NodeState {
                node_id: "a".into(),
                state: NodeState::Succeeded,
                iteration: 0,
                message: None,
            },
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], json!("node_state"));
        assert_eq!(value["state"], json!("SUCCEEDED"));
        assert!(value.get("message").is_none());

        let back: Event = serde_json::from_value(value).unwrap();
        assert_eq!(back.node_state(), Some(("a", NodeState::Succeeded)));
    }
}
