//! Ordered write access to resource sinks.
//!
//! Every link `writer → sink` gets a [`WriteTicket`] carrying the link's
//! write index. The sink's [`WriteGate`] grants a ticket its turn only once
//! no ticket with a smaller index is outstanding, so writes land in
//! non-decreasing index order. Tickets with equal indices are not ordered
//! against each other.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{ItemError, ItemExecutor};

/// Serializes the writes into one sink node.
pub struct WriteGate {
    sink_id: String,
    sink: Arc<dyn ItemExecutor>,
    /// Outstanding ticket count per write index.
    outstanding: Mutex<BTreeMap<u32, usize>>,
    /// Smallest outstanding index, `None` when nothing is outstanding.
    turn: watch::Sender<Option<u32>>,
    purge_armed: AtomicBool,
    purge_lock: tokio::sync::Mutex<()>,
}

impl WriteGate {
    pub fn new(sink_id: impl Into<String>, sink: Arc<dyn ItemExecutor>) -> Arc<Self> {
        let (turn, _) = watch::channel(None);
        Arc::new(Self {
            sink_id: sink_id.into(),
            sink,
            outstanding: Mutex::new(BTreeMap::new()),
            turn,
            purge_armed: AtomicBool::new(false),
            purge_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn sink_id(&self) -> &str {
        &self.sink_id
    }

    /// Issue a ticket for `writer` at `index`. With `purge` set, the sink is
    /// purged before the next granted write.
    pub fn register(self: &Arc<Self>, writer: impl Into<String>, index: u32, purge: bool) -> Arc<WriteTicket> {
        {
            let mut outstanding = self.lock_outstanding();
            *outstanding.entry(index).or_default() += 1;
            self.turn.send_replace(outstanding.keys().next().copied());
        }
        if purge {
            self.purge_armed.store(true, Ordering::SeqCst);
        }
        Arc::new(WriteTicket {
            gate: Arc::clone(self),
            writer: writer.into(),
            index,
            released: AtomicBool::new(false),
        })
    }

    /// Number of tickets not yet released.
    pub fn outstanding(&self) -> usize {
        self.lock_outstanding().values().sum()
    }

    fn lock_outstanding(&self) -> std::sync::MutexGuard<'_, BTreeMap<u32, usize>> {
        // A poisoned map is still consistent: every mutation is a single step.
        self.outstanding
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn release(&self, index: u32) {
        let mut outstanding = self.lock_outstanding();
        if let Some(count) = outstanding.get_mut(&index) {
            *count -= 1;
            if *count == 0 {
                outstanding.remove(&index);
            }
        }
        self.turn.send_replace(outstanding.keys().next().copied());
    }

    async fn wait_turn(&self, index: u32, cancel: &CancellationToken) -> Result<(), ItemError> {
        let mut turn = self.turn.subscribe();
        tokio::select! {
            ready = turn.wait_for(|lowest| lowest.map_or(true, |lowest| lowest >= index)) => {
                ready.map(|_| ()).map_err(|_| ItemError::Execution(format!(
                    "write gate of sink '{}' closed", self.sink_id
                )))
            }
            _ = cancel.cancelled() => Err(ItemError::Cancelled),
        }
    }

    async fn purge_if_armed(&self) -> Result<(), ItemError> {
        let _serialized = self.purge_lock.lock().await;
        if self.purge_armed.swap(false, Ordering::SeqCst) {
            info!(sink = %self.sink_id, "purging sink before first write");
            if let Err(e) = self.sink.purge().await {
                self.purge_armed.store(true, Ordering::SeqCst);
                return Err(e);
            }
        }
        Ok(())
    }
}

/// One writer's claim on a sink's write order.
pub struct WriteTicket {
    gate: Arc<WriteGate>,
    writer: String,
    index: u32,
    released: AtomicBool,
}

impl WriteTicket {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn sink_id(&self) -> &str {
        self.gate.sink_id()
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Wait until every lower-index writer is done, purge the sink if armed,
    /// and hand out the write turn.
    pub async fn acquire(
        self: &Arc<Self>,
        cancel: &CancellationToken,
    ) -> Result<WriteGuard, ItemError> {
        if self.is_released() {
            return Err(ItemError::Execution(format!(
                "write turn of '{}' into '{}' already finished",
                self.writer,
                self.sink_id()
            )));
        }
        self.gate.wait_turn(self.index, cancel).await?;
        self.gate.purge_if_armed().await?;
        debug!(writer = %self.writer, sink = %self.sink_id(), index = self.index, "write turn granted");
        Ok(WriteGuard {
            ticket: Arc::clone(self),
        })
    }

    /// Give up the ticket. Idempotent; the engine calls it whenever the
    /// writer node leaves the running state.
    pub fn release(&self) {
        if !self.released.swap(true, Ordering::SeqCst) {
            self.gate.release(self.index);
        }
    }
}

/// Proof that the holder may write into a sink.
///
/// Dropping the guard keeps the turn until the writer node completes; call
/// [`WriteGuard::finish`] to let higher-index writers in earlier.
pub struct WriteGuard {
    ticket: Arc<WriteTicket>,
}

impl WriteGuard {
    pub fn sink_id(&self) -> &str {
        self.ticket.sink_id()
    }

    pub fn finish(self) {
        self.ticket.release();
    }
}
