//! # Node Harness
//! This crate provides the synchronization core for tests that run as several
//! cooperating processes ("nodes"). Every node executes the same logical test,
//! the nodes rendezvous at named checkpoints, and exactly one node (node 0)
//! observes and reports the combined result.
//! ## Features
//! - Fixed-capacity queues with non-blocking insert/remove, safe to share between threads
//! - Barriers that release only once every expected participant has arrived, across processes
//! - Counters persisted on disk and mutated only under an exclusive file lock
//! - Injectable sync hooks so a single-node no-op run and a true multi-process run share one contract
//! - A launcher that starts a group of nodes and forwards their output
//! ## Example
//! ```
//! use node_harness::BoundedQueue;
//! let queue = BoundedQueue::new(2);
//! assert!(queue.insert(1));
//! assert!(queue.insert(2));
//! assert!(!queue.insert(3));
//! assert_eq!(queue.remove(), Some(1));
//! ```
use std::path::PathBuf;
use std::time::Duration;

pub mod barrier;
pub mod config;
pub mod context;
pub mod counter;
pub mod launcher;
pub mod lock;
pub mod logger;
pub mod queue;
pub mod scenario;
pub mod sync;

pub use barrier::{FileBarrier, LocalBarrier, NodeBarrier, NoopBarrier};
pub use context::HarnessContext;
pub use counter::GuardedCounter;
pub use lock::{with_lock, ExclusiveLock, FileLock, LocalLock, LockGuard, NoopLock};
pub use queue::{drain_until_empty, fill_until_full, BoundedQueue, QueueOrder};
pub use scenario::{run_scenario, Scenario};
pub use sync::{build_sync_hooks, SyncHooks};

#[derive(thiserror::Error, Debug)]
/// Represents errors that can occur while running a harness node
/// # Example
/// ```
/// use node_harness::HarnessError;
/// let error = HarnessError::LockError("lock file vanished".to_string());
/// assert_eq!(error.to_string(), "Lock error: lock file vanished");
/// ```
pub enum HarnessError {
    /// Error related to file system access
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    /// Error related to parsing the YAML configuration
    #[error("Config error: {0}")]
    ConfigError(#[from] serde_yaml::Error),
    /// The configuration parsed but describes an impossible run
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    /// The external lock could not be acquired or released
    #[error("Lock error: {0}")]
    LockError(String),
    /// The counter file holds something other than a decimal integer
    #[error("Malformed value in {path:?}: {content:?}")]
    MalformedPersistedValue { path: PathBuf, content: String },
    /// A barrier waiter gave up, or another waiter on the same generation did
    #[error("Barrier {checkpoint:?} timed out after {waited:?}")]
    Timeout { checkpoint: String, waited: Duration },
    /// A contribution would push a generation past its expected count
    #[error("Barrier {checkpoint:?} overflow: {arrived} + {contribution} > {expected}")]
    BarrierOverflow {
        checkpoint: String,
        arrived: u32,
        contribution: u32,
        expected: u32,
    },
    /// Two nodes disagree on how many participants a barrier expects
    #[error("Barrier {checkpoint:?} expects {found} participants, this node expects {expected}")]
    BarrierMismatch {
        checkpoint: String,
        expected: u32,
        found: u32,
    },
    /// The shared barrier state could not be decoded
    #[error("Barrier state error: {0}")]
    BarrierState(#[from] serde_json::Error),
    /// A blocking task panicked or was cancelled
    #[error("Task join error: {0}")]
    JoinError(#[from] tokio::task::JoinError),
    /// Other general errors
    #[error("Other error: {0}")]
    OtherError(String),
}
