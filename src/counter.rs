//! A counter persisted as decimal text and shared between processes.

use crate::lock::{with_lock, ExclusiveLock, FileLock};
use crate::HarnessError;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// An integer stored in a file, mutated only while holding an exclusive lock
///
/// A missing or empty file reads as 0. Any other non-numeric content is
/// reported as [`HarnessError::MalformedPersistedValue`] and left untouched.
/// # Example
/// ```
/// use node_harness::GuardedCounter;
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let dir = tempfile::tempdir().unwrap();
/// let counter = GuardedCounter::for_file(dir.path().join("counter.dat"));
/// assert_eq!(counter.increment().await.unwrap(), 1);
/// assert_eq!(counter.read().await.unwrap(), 1);
/// # });
/// ```
#[derive(Clone)]
pub struct GuardedCounter {
    path: PathBuf,
    lock: Arc<dyn ExclusiveLock>,
}

impl GuardedCounter {
    /// Create a counter stored at `path` and guarded by `lock`
    pub fn new(path: impl Into<PathBuf>, lock: Arc<dyn ExclusiveLock>) -> Self {
        Self {
            path: path.into(),
            lock,
        }
    }

    /// Create a counter guarded by the file lock `<path>.lock`
    pub fn for_file(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let lock = Arc::new(FileLock::for_resource(&path));
        Self { path, lock }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Add one to the persisted value
    ///
    /// Read, parse, add and write all happen under the lock, and the new value
    /// is synced to disk before the lock is released.
    /// # Returns
    /// * The value after the increment
    pub async fn increment(&self) -> Result<u64, HarnessError> {
        let path = self.path.clone();
        let value = with_lock(self.lock.as_ref(), move || {
            let current = read_value(&path)?;
            let next = current.checked_add(1).ok_or_else(|| {
                HarnessError::OtherError(format!("counter {:?} cannot go past {}", path, current))
            })?;
            write_value(&path, next)?;
            Ok(next)
        })
        .await?;
        log::debug!("counter {:?} incremented to {}", self.path, value);
        Ok(value)
    }

    /// Read the persisted value under the lock
    pub async fn read(&self) -> Result<u64, HarnessError> {
        let path = self.path.clone();
        with_lock(self.lock.as_ref(), move || read_value(&path)).await
    }
}

fn read_value(path: &Path) -> Result<u64, HarnessError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };
    let trimmed = contents.trim();
    if trimmed.is_empty() {
        return Ok(0);
    }
    trimmed
        .parse()
        .map_err(|_| HarnessError::MalformedPersistedValue {
            path: path.to_path_buf(),
            content: contents.clone(),
        })
}

fn write_value(path: &Path, value: u64) -> Result<(), HarnessError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    write!(file, "{}", value)?;
    file.flush()?;
    file.sync_all()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::LocalLock;
    use futures::future::join_all;

    #[tokio::test]
    async fn test_absent_and_empty_read_as_zero() {
        let dir = tempfile::tempdir().unwrap();
        let counter = GuardedCounter::for_file(dir.path().join("absent.dat"));
        assert_eq!(counter.read().await.unwrap(), 0);
        std::fs::write(counter.path(), "").unwrap();
        assert_eq!(counter.read().await.unwrap(), 0);
        assert_eq!(counter.increment().await.unwrap(), 1);
        assert_eq!(std::fs::read_to_string(counter.path()).unwrap(), "1");
    }

    #[tokio::test]
    async fn test_malformed_value_is_fatal_and_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let counter = GuardedCounter::for_file(dir.path().join("bad.dat"));
        std::fs::write(counter.path(), "twelve").unwrap();
        let err = counter.increment().await.unwrap_err();
        assert!(matches!(
            err,
            HarnessError::MalformedPersistedValue { ref content, .. } if content == "twelve"
        ));
        assert_eq!(std::fs::read_to_string(counter.path()).unwrap(), "twelve");
        std::fs::write(counter.path(), "-3").unwrap();
        assert!(counter.read().await.is_err());
    }

    #[tokio::test]
    async fn test_saturated_counter_is_an_error_and_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let counter = GuardedCounter::for_file(dir.path().join("max.dat"));
        let max = u64::MAX.to_string();
        std::fs::write(counter.path(), &max).unwrap();
        assert!(matches!(
            counter.increment().await,
            Err(HarnessError::OtherError(_))
        ));
        assert_eq!(std::fs::read_to_string(counter.path()).unwrap(), max);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_increments_are_not_lost() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("counter.dat");
        for round in 1..=2u64 {
            // Independent handles, each with its own lock file descriptor.
            let tasks = (0..3).map(|_| {
                let counter = GuardedCounter::for_file(&path);
                tokio::spawn(async move { counter.increment().await })
            });
            for joined in join_all(tasks).await {
                joined.unwrap().unwrap();
            }
            let total = GuardedCounter::for_file(&path).read().await.unwrap();
            assert_eq!(total, 3 * round);
        }
    }

    #[tokio::test]
    async fn test_local_lock_counter() {
        let dir = tempfile::tempdir().unwrap();
        let counter =
            GuardedCounter::new(dir.path().join("local.dat"), Arc::new(LocalLock::new()));
        for _ in 0..5 {
            counter.increment().await.unwrap();
        }
        assert_eq!(counter.read().await.unwrap(), 5);
    }
}
