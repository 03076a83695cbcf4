//! Worker slot budgets for one run.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::models::{RunSettings, SlotLimit};

/// Process and console slot pools. `None` means unlimited.
#[derive(Debug, Clone)]
pub struct SlotBudget {
    processes: Option<Arc<Semaphore>>,
    consoles: Option<Arc<Semaphore>>,
}

/// Slots held by one running node; dropping releases them.
#[derive(Debug)]
pub struct SlotPermits {
    _process: Option<OwnedSemaphorePermit>,
    _console: Option<OwnedSemaphorePermit>,
}

fn pool(limit: SlotLimit) -> Option<Arc<Semaphore>> {
    limit.resolve().map(|n| Arc::new(Semaphore::new(n)))
}

fn take(pool: &Option<Arc<Semaphore>>, wanted: bool) -> Result<Option<OwnedSemaphorePermit>, ()> {
    match pool {
        Some(semaphore) if wanted => Arc::clone(semaphore)
            .try_acquire_owned()
            .map(Some)
            .map_err(|_| ()),
        _ => Ok(None),
    }
}

impl SlotBudget {
    pub fn new(settings: &RunSettings) -> Self {
        Self {
            processes: pool(settings.max_concurrent_processes),
            consoles: pool(settings.max_open_consoles),
        }
    }

    /// Take every slot a node needs, or none of them.
    pub fn try_acquire(&self, process: bool, console: bool) -> Option<SlotPermits> {
        let process = take(&self.processes, process).ok()?;
        // On failure the process permit drops here and goes back to the pool.
        let console = take(&self.consoles, console).ok()?;
        Some(SlotPermits {
            _process: process,
            _console: console,
        })
    }

    /// Free process slots, `None` when unlimited.
    pub fn available_processes(&self) -> Option<usize> {
        self.processes.as_ref().map(|s| s.available_permits())
    }
}
