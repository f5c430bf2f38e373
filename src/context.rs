//! Everything one node needs for one run, passed explicitly to each operation.

use crate::config::HarnessConfig;
use crate::counter::GuardedCounter;
use crate::queue::{drain_until_empty, BoundedQueue, QueueOrder};
use crate::scenario::Scenario;
use crate::sync::{build_sync_hooks, SyncHooks};
use crate::HarnessError;
use std::path::PathBuf;
use std::sync::Arc;

/// The state of one node for one harness run
pub struct HarnessContext {
    /// Index of this node, 0 reports
    pub node_id: u32,
    /// Total number of nodes in the run
    pub participant_count: u32,
    /// Fixture this node executes
    pub scenario: Scenario,
    /// Capacity of the fixture queue
    pub queue_capacity: usize,
    /// Removal order of the fixture queue
    pub queue_order: QueueOrder,
    /// Barriers and locks shared with the other nodes
    pub hooks: SyncHooks,
    /// The shared counter, guarded by `hooks.counter_lock`
    pub counter: GuardedCounter,
}

impl HarnessContext {
    /// Build the context for a node process from its configuration
    /// # Errors
    /// * If the configuration is invalid or the sync hooks cannot be set up
    pub fn from_config(config: &HarnessConfig) -> Result<Self, HarnessError> {
        config.validate()?;
        let hooks = build_sync_hooks(config)?;
        let mut context = Self::new(
            config.node_id,
            config.participant_count,
            config.scenario,
            hooks,
            config.counter_path.clone(),
        );
        context.queue_capacity = config.queue_capacity;
        context.queue_order = config.queue_order;
        Ok(context)
    }

    /// Build a context from explicit parts, e.g. for several nodes in one process
    pub fn new(
        node_id: u32,
        participant_count: u32,
        scenario: Scenario,
        hooks: SyncHooks,
        counter_path: PathBuf,
    ) -> Self {
        let counter = GuardedCounter::new(counter_path, Arc::clone(&hooks.counter_lock));
        Self {
            node_id,
            participant_count,
            scenario,
            queue_capacity: 10,
            queue_order: QueueOrder::Fifo,
            hooks,
            counter,
        }
    }

    pub fn is_reporter(&self) -> bool {
        self.node_id == 0
    }

    /// A fresh queue fixture sized and ordered for this run
    pub fn queue_run<T>(&self) -> QueueRun<T> {
        QueueRun {
            queue: BoundedQueue::with_order(self.queue_capacity, self.queue_order),
            collected: Vec::new(),
        }
    }
}

/// One queue fixture: the queue and the values this node drained from it
pub struct QueueRun<T> {
    pub queue: BoundedQueue<T>,
    pub collected: Vec<T>,
}

impl<T> QueueRun<T> {
    /// Drain the queue into `collected`
    pub fn drain(&mut self) {
        let drained = drain_until_empty(&self.queue);
        self.collected.extend(drained);
    }
}
