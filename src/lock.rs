//! Exclusive locks over one shared resource.
//!
//! [`ExclusiveLock`] is the injection point for mutual exclusion. A
//! [`NoopLock`] serves single-node runs, a [`LocalLock`] serializes tasks in
//! one process, and a [`FileLock`] serializes whole processes through an
//! advisory `flock(2)` on a lock file.

use crate::HarnessError;
use async_trait::async_trait;
use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Types implementing this trait hand out exclusive access to one resource.
/// Access lasts until the returned [`LockGuard`] is dropped.
/// # Example
/// ```
/// use node_harness::{with_lock, ExclusiveLock, LocalLock};
/// # tokio_test_block_on(async {
/// let lock = LocalLock::new();
/// let doubled = with_lock(&lock, || Ok(21 * 2)).await.unwrap();
/// assert_eq!(doubled, 42);
/// # });
/// # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Runtime::new().unwrap().block_on(f)
/// # }
/// ```
#[async_trait]
pub trait ExclusiveLock: Send + Sync {
    /// Wait until the resource is free and take it
    /// # Errors
    /// * `HarnessError::LockError` if the lock primitive itself fails
    async fn lock(&self) -> Result<LockGuard, HarnessError>;
}

/// Proof of exclusive access; releases the lock when dropped
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard {
    held: Held,
}

enum Held {
    Nothing,
    Local(OwnedMutexGuard<()>),
    File { file: File, path: PathBuf },
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.held {
            Held::Nothing => f.write_str("LockGuard(noop)"),
            Held::Local(guard) => write!(f, "LockGuard(local {:?})", &**guard),
            Held::File { path, .. } => write!(f, "LockGuard({:?})", path),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Held::File { file, path } = &self.held {
            // SAFETY: the descriptor belongs to `file`, which is still open here.
            let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_UN) };
            if rc != 0 {
                log::warn!(
                    "failed to unlock {:?}: {}",
                    path,
                    std::io::Error::last_os_error()
                );
            } else {
                log::trace!("unlocked {:?}", path);
            }
        }
    }
}

/// Run `critical_section` while holding `lock`
///
/// The critical section does blocking file I/O, so it runs on tokio's blocking
/// pool. The lock is released on every exit path, including an error returned
/// by the critical section, before this function returns.
/// # Arguments
/// * `lock` - The lock guarding the shared resource
/// * `critical_section` - Work that must not interleave with other holders
/// # Errors
/// * Any error from acquiring the lock or from the critical section
/// * `HarnessError::JoinError` if the critical section panicked
pub async fn with_lock<L, F, T>(lock: &L, critical_section: F) -> Result<T, HarnessError>
where
    L: ExclusiveLock + ?Sized,
    F: FnOnce() -> Result<T, HarnessError> + Send + 'static,
    T: Send + 'static,
{
    let guard = lock.lock().await?;
    let result = tokio::task::spawn_blocking(critical_section).await;
    drop(guard);
    result?
}

/// A lock that is always free, for single-node runs
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopLock;

#[async_trait]
impl ExclusiveLock for NoopLock {
    async fn lock(&self) -> Result<LockGuard, HarnessError> {
        Ok(LockGuard {
            held: Held::Nothing,
        })
    }
}

/// A lock shared by tasks and threads of one process
#[derive(Clone, Debug, Default)]
pub struct LocalLock {
    inner: Arc<Mutex<()>>,
}

impl LocalLock {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExclusiveLock for LocalLock {
    async fn lock(&self) -> Result<LockGuard, HarnessError> {
        let guard = Arc::clone(&self.inner).lock_owned().await;
        Ok(LockGuard {
            held: Held::Local(guard),
        })
    }
}

/// A lock shared by every process that opens the same lock file
///
/// The lock file is created on first use and never removed; it carries no
/// data. Acquisition blocks a worker thread, not the async runtime.
#[derive(Clone, Debug)]
pub struct FileLock {
    path: PathBuf,
}

impl FileLock {
    /// Create a lock keyed to `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Create the lock that guards the resource stored at `resource`,
    /// i.e. `<resource>.lock`
    pub fn for_resource(resource: &Path) -> Self {
        let mut name = resource.as_os_str().to_owned();
        name.push(".lock");
        Self::new(PathBuf::from(name))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ExclusiveLock for FileLock {
    async fn lock(&self) -> Result<LockGuard, HarnessError> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || lock_file(path)).await?
    }
}

fn lock_file(path: PathBuf) -> Result<LockGuard, HarnessError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&path)
        .map_err(|e| HarnessError::LockError(format!("cannot open {:?}: {}", path, e)))?;
    loop {
        // SAFETY: the descriptor belongs to `file`, which outlives this call.
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
        if rc == 0 {
            break;
        }
        let err = std::io::Error::last_os_error();
        if err.kind() != std::io::ErrorKind::Interrupted {
            return Err(HarnessError::LockError(format!(
                "cannot lock {:?}: {}",
                path, err
            )));
        }
    }
    log::trace!("locked {:?}", path);
    Ok(LockGuard {
        held: Held::File { file, path },
    })
}
