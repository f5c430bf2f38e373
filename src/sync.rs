use crate::barrier::{FileBarrier, LocalBarrier, NodeBarrier, NoopBarrier};
use crate::config::{HarnessConfig, SyncMode};
use crate::lock::{ExclusiveLock, FileLock, LocalLock, NoopLock};
use crate::HarnessError;
use std::sync::Arc;
use std::time::Duration;

/// Checkpoint separating the queue fill phase from the report phase
pub const QUEUE_CHECKPOINT: &str = "queue";
/// Checkpoint separating counter increments from the final read
pub const COUNTER_CHECKPOINT: &str = "counter";

/// The synchronization hooks one node runs against
pub struct SyncHooks {
    pub queue_barrier: Arc<dyn NodeBarrier>,
    pub counter_barrier: Arc<dyn NodeBarrier>,
    pub counter_lock: Arc<dyn ExclusiveLock>,
}

impl SyncHooks {
    /// Hooks that never wait, for a lone node
    pub fn noop() -> Self {
        Self {
            queue_barrier: Arc::new(NoopBarrier),
            counter_barrier: Arc::new(NoopBarrier),
            counter_lock: Arc::new(NoopLock),
        }
    }

    /// One set of hooks per node for `nodes` nodes living in this process
    pub fn local_group(nodes: u32, timeout: Option<Duration>) -> Vec<Self> {
        let queue = LocalBarrier::new(QUEUE_CHECKPOINT, nodes, timeout);
        let counter = LocalBarrier::new(COUNTER_CHECKPOINT, nodes, timeout);
        let lock = LocalLock::new();
        (0..nodes)
            .map(|_| Self {
                queue_barrier: Arc::new(queue.handle()),
                counter_barrier: Arc::new(counter.handle()),
                counter_lock: Arc::new(lock.clone()),
            })
            .collect()
    }
}

/// Build the hooks a node process should use from its configuration
/// # Errors
/// * If the session directory cannot be created
pub fn build_sync_hooks(config: &HarnessConfig) -> Result<SyncHooks, HarnessError> {
    match config.sync.mode {
        SyncMode::Noop => Ok(SyncHooks::noop()),
        SyncMode::File => {
            std::fs::create_dir_all(&config.work_dir)?;
            let barrier = |checkpoint: &str| {
                Arc::new(FileBarrier::new(
                    &config.work_dir,
                    checkpoint,
                    config.participant_count,
                    config.sync.poll_interval(),
                    config.sync.timeout(),
                ))
            };
            Ok(SyncHooks {
                queue_barrier: barrier(QUEUE_CHECKPOINT),
                counter_barrier: barrier(COUNTER_CHECKPOINT),
                counter_lock: Arc::new(FileLock::for_resource(&config.counter_path)),
            })
        }
    }
}
