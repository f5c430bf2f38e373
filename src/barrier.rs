//! Barriers that hold every participant at a checkpoint until all have arrived.
//!
//! A barrier is created with the number of contributions it expects. Each
//! participant owns its own handle. `arrive(n)` with `n > 0` adds `n`
//! contributions to the current generation and waits for that generation to
//! be released; `arrive(0)` (or [`NodeBarrier::wait`]) only waits. Once a
//! generation collects its expected count it is released as a whole and the
//! next generation starts empty, so a checkpoint can be reused.
//!
//! Without a deadline a missing participant blocks everyone forever. With a
//! deadline the first waiter to run out of time marks the generation broken,
//! and every waiter on it fails with [`HarnessError::Timeout`].

use crate::lock::{with_lock, FileLock};
use crate::HarnessError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::Notify;

/// Types implementing this trait are rendezvous points for a fixed set of
/// participants. The participants may be tasks, threads or whole processes.
#[async_trait]
pub trait NodeBarrier: Send + Sync {
    /// Register `contribution` arrivals, then wait for the generation to release
    /// # Arguments
    /// * `contribution` - Units of progress to add; 0 only waits
    /// # Errors
    /// * `HarnessError::BarrierOverflow` if the generation would exceed its expected count
    /// * `HarnessError::Timeout` if a deadline is configured and passes
    async fn arrive(&self, contribution: u32) -> Result<(), HarnessError>;

    /// Wait without contributing
    async fn wait(&self) -> Result<(), HarnessError> {
        self.arrive(0).await
    }

    /// Number of contributions that release one generation
    fn expected(&self) -> u32;
}

/// A barrier that never waits, for single-node runs
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopBarrier;

#[async_trait]
impl NodeBarrier for NoopBarrier {
    async fn arrive(&self, _contribution: u32) -> Result<(), HarnessError> {
        Ok(())
    }

    fn expected(&self) -> u32 {
        1
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
/// Arrival bookkeeping shared by all participants of one checkpoint
struct BarrierState {
    /// Number of generations released so far
    generation: u64,
    /// Contributions that release a generation
    expected: u32,
    /// Contributions received in the current generation
    arrived: u32,
    /// Set once a waiter timed out; the checkpoint stays failed
    broken: bool,
}

impl BarrierState {
    fn new(expected: u32) -> Self {
        Self {
            expected,
            ..Default::default()
        }
    }

    /// Adopt this node's expected count if the checkpoint is idle, or check it agrees
    fn reconcile(&mut self, checkpoint: &str, expected: u32) -> Result<(), HarnessError> {
        if self.expected == expected {
            return Ok(());
        }
        if self.arrived == 0 && !self.broken {
            self.expected = expected;
            return Ok(());
        }
        Err(HarnessError::BarrierMismatch {
            checkpoint: checkpoint.to_string(),
            expected,
            found: self.expected,
        })
    }

    /// Add a contribution and return the generation the caller must wait on
    fn register(&mut self, checkpoint: &str, contribution: u32) -> Result<u64, HarnessError> {
        if self.broken {
            return Err(HarnessError::Timeout {
                checkpoint: checkpoint.to_string(),
                waited: Duration::ZERO,
            });
        }
        let total = self.arrived.checked_add(contribution);
        if total.map_or(true, |total| total > self.expected) {
            return Err(HarnessError::BarrierOverflow {
                checkpoint: checkpoint.to_string(),
                arrived: self.arrived,
                contribution,
                expected: self.expected,
            });
        }
        let generation = self.generation;
        self.arrived += contribution;
        if self.arrived >= self.expected {
            self.generation += 1;
            self.arrived = 0;
        }
        Ok(generation)
    }

    fn released(&self, generation: u64) -> bool {
        self.generation > generation
    }

    /// Give up on `generation` unless it was released meanwhile
    /// # Returns
    /// * `true` if the generation was released and the waiter may proceed
    fn expire(&mut self, generation: u64) -> bool {
        if self.released(generation) {
            return true;
        }
        self.broken = true;
        false
    }
}

/// Per-handle memory of the last generation this participant contributed to
#[derive(Debug, Default)]
struct Participation {
    last: Mutex<Option<u64>>,
}

impl Participation {
    fn last(&self) -> Option<u64> {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, generation: u64) {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = Some(generation);
    }

    fn clear(&self) {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// The generation a pure wait should block on
    ///
    /// A handle that never contributed follows the checkpoint: while nothing is
    /// pending, the last release already covers it and the wait returns at once.
    fn wait_target(&self, state: &BarrierState) -> u64 {
        match self.last() {
            Some(generation) => generation,
            None if state.arrived == 0 && state.generation > 0 => state.generation - 1,
            None => state.generation,
        }
    }
}

fn timeout_error(checkpoint: &str, started: Instant) -> HarnessError {
    HarnessError::Timeout {
        checkpoint: checkpoint.to_string(),
        waited: started.elapsed(),
    }
}

struct LocalShared {
    checkpoint: String,
    state: Mutex<BarrierState>,
    notify: Notify,
}

/// A barrier for tasks and threads of one process
/// # Example
/// ```
/// use node_harness::{LocalBarrier, NodeBarrier};
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let first = LocalBarrier::new("start", 2, None);
/// let second = first.handle();
/// let other = tokio::spawn(async move { second.arrive(1).await });
/// first.arrive(1).await.unwrap();
/// other.await.unwrap().unwrap();
/// # });
/// ```
pub struct LocalBarrier {
    shared: Arc<LocalShared>,
    participation: Participation,
    timeout: Option<Duration>,
}

impl LocalBarrier {
    /// Create a barrier named `checkpoint` releasing after `expected` contributions
    pub fn new(checkpoint: impl Into<String>, expected: u32, timeout: Option<Duration>) -> Self {
        Self {
            shared: Arc::new(LocalShared {
                checkpoint: checkpoint.into(),
                state: Mutex::new(BarrierState::new(expected)),
                notify: Notify::new(),
            }),
            participation: Participation::default(),
            timeout,
        }
    }

    /// A new participant handle on the same checkpoint
    pub fn handle(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            participation: Participation::default(),
            timeout: self.timeout,
        }
    }

    /// Forget all arrivals and generations, e.g. before a repeated run
    pub fn reset(&self) {
        let mut state = self.state();
        let expected = state.expected;
        *state = BarrierState::new(expected);
        self.participation.clear();
    }

    fn state(&self) -> std::sync::MutexGuard<'_, BarrierState> {
        self.shared.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Ok(true) once `generation` is released, Err if the checkpoint broke
    fn poll(&self, generation: u64, started: Instant) -> Result<bool, HarnessError> {
        let state = self.state();
        if state.released(generation) {
            Ok(true)
        } else if state.broken {
            Err(timeout_error(&self.shared.checkpoint, started))
        } else {
            Ok(false)
        }
    }
}

#[async_trait]
impl NodeBarrier for LocalBarrier {
    async fn arrive(&self, contribution: u32) -> Result<(), HarnessError> {
        let checkpoint = &self.shared.checkpoint;
        let started = Instant::now();
        let generation = {
            let mut state = self.state();
            if contribution > 0 {
                let generation = state.register(checkpoint, contribution)?;
                self.participation.record(generation);
                if state.released(generation) {
                    log::debug!("barrier {checkpoint:?} released generation {generation}");
                    self.shared.notify.notify_waiters();
                }
                generation
            } else {
                self.participation.wait_target(&state)
            }
        };
        let deadline = self.timeout.map(|t| tokio::time::Instant::from_std(started + t));
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.poll(generation, started)? {
                return Ok(());
            }
            match deadline {
                None => notified.await,
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        let released = self.state().expire(generation);
                        if released {
                            return Ok(());
                        }
                        self.shared.notify.notify_waiters();
                        log::warn!("barrier {checkpoint:?} timed out waiting on generation {generation}");
                        return Err(timeout_error(checkpoint, started));
                    }
                }
            }
        }
    }

    fn expected(&self) -> u32 {
        self.state().expected
    }
}

/// Location and identity of one checkpoint's shared state
#[derive(Clone, Debug)]
struct StateFile {
    checkpoint: String,
    expected: u32,
    path: PathBuf,
}

impl StateFile {
    fn decode(&self, read: std::io::Result<String>) -> Result<BarrierState, HarnessError> {
        match read {
            Ok(contents) if contents.trim().is_empty() => Ok(BarrierState::new(self.expected)),
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(BarrierState::new(self.expected))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn read(&self) -> Result<BarrierState, HarnessError> {
        self.decode(std::fs::read_to_string(&self.path))
    }

    async fn poll(&self) -> Result<BarrierState, HarnessError> {
        self.decode(tokio::fs::read_to_string(&self.path).await)
    }

    fn write(&self, state: &BarrierState) -> Result<(), HarnessError> {
        let dir = self.path.parent().unwrap_or(Path::new("."));
        std::fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        serde_json::to_writer(&mut tmp, state)?;
        tmp.flush()?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}

/// A barrier shared by every process that points at the same state directory
///
/// The arrival state lives in `<dir>/<checkpoint>.barrier.json` and is only
/// rewritten under an exclusive lock on a sibling lock file. Waiters poll the
/// state file; rewrites are atomic renames, so a reader never sees a partial
/// state.
pub struct FileBarrier {
    file: StateFile,
    lock: FileLock,
    poll_interval: Duration,
    timeout: Option<Duration>,
    participation: Participation,
}

impl FileBarrier {
    /// Create a participant handle
    /// # Arguments
    /// * `dir` - Directory shared by all participants
    /// * `checkpoint` - Name of the checkpoint, used as the file stem
    /// * `expected` - Contributions that release one generation
    /// * `poll_interval` - Delay between reads of the shared state while waiting
    /// * `timeout` - Optional deadline for each `arrive`
    pub fn new(
        dir: &Path,
        checkpoint: impl Into<String>,
        expected: u32,
        poll_interval: Duration,
        timeout: Option<Duration>,
    ) -> Self {
        let checkpoint = checkpoint.into();
        let path = dir.join(format!("{checkpoint}.barrier.json"));
        let lock = FileLock::for_resource(&path);
        Self {
            file: StateFile {
                checkpoint,
                expected,
                path,
            },
            lock,
            poll_interval,
            timeout,
            participation: Participation::default(),
        }
    }

    pub fn state_path(&self) -> &Path {
        &self.file.path
    }

    /// Remove the shared state so the checkpoint starts over
    pub async fn reset(&self) -> Result<(), HarnessError> {
        let path = self.file.path.clone();
        with_lock(&self.lock, move || match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        })
        .await?;
        self.participation.clear();
        Ok(())
    }

    async fn load(&self) -> Result<BarrierState, HarnessError> {
        self.file.poll().await
    }

    /// Read-modify-write the shared state under the lock
    async fn update<T, F>(&self, change: F) -> Result<T, HarnessError>
    where
        F: FnOnce(&str, &mut BarrierState) -> Result<T, HarnessError> + Send + 'static,
        T: Send + 'static,
    {
        let file = self.file.clone();
        with_lock(&self.lock, move || {
            let mut state = file.read()?;
            state.reconcile(&file.checkpoint, file.expected)?;
            let out = change(&file.checkpoint, &mut state)?;
            file.write(&state)?;
            Ok(out)
        })
        .await
    }
}

#[async_trait]
impl NodeBarrier for FileBarrier {
    async fn arrive(&self, contribution: u32) -> Result<(), HarnessError> {
        let checkpoint = self.file.checkpoint.as_str();
        let started = Instant::now();
        let generation = if contribution > 0 {
            let generation = self
                .update(move |checkpoint, state| {
                    let generation = state.register(checkpoint, contribution)?;
                    if state.released(generation) {
                        log::debug!("barrier {checkpoint:?} released generation {generation}");
                    }
                    Ok(generation)
                })
                .await?;
            self.participation.record(generation);
            generation
        } else {
            let state = self.load().await?;
            self.participation.wait_target(&state)
        };
        log::debug!("barrier {checkpoint:?} waiting on generation {generation}");
        loop {
            let state = self.load().await?;
            if state.released(generation) {
                return Ok(());
            }
            if state.broken {
                return Err(timeout_error(checkpoint, started));
            }
            if let Some(timeout) = self.timeout {
                if started.elapsed() >= timeout {
                    let released = self
                        .update(move |_, state| Ok(state.expire(generation)))
                        .await?;
                    if released {
                        return Ok(());
                    }
                    log::warn!("barrier {checkpoint:?} timed out waiting on generation {generation}");
                    return Err(timeout_error(checkpoint, started));
                }
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    fn expected(&self) -> u32 {
        self.file.expected
    }
}
