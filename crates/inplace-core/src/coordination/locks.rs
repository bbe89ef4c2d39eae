//! In-process and cross-process locking for coordinated access.
//!
//! Two layers guard every coordinated operation:
//!
//! - **In-process**: a [`LockTable`] of per-path `tokio` reader/writer locks,
//!   so this process never issues competing operations on one path.
//! - **Cross-process**: an advisory `flock` taken on a blocking worker, shared
//!   for reading and exclusive for writing or deleting.
//!
//! The cross-process lock is taken on the target when it exists, otherwise
//! on its parent directory (creating a file is a change to the directory).
//! When neither exists there is nothing to lock and the accessor runs
//! unlocked, reporting its own I/O error.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::trace;

use super::AccessIntent;
use crate::error::CoordinationError;

/// Guard returned by [`LockTable::acquire`].
#[derive(Debug)]
pub enum PathGuard {
    Shared(OwnedRwLockReadGuard<()>),
    Exclusive(OwnedRwLockWriteGuard<()>),
}

/// Per-path reader/writer locks for this process.
///
/// Locks are created lazily and shared by every coordinated operation on
/// the same path. [`release`](Self::release) drops a path's entry once
/// nobody holds or waits on it.
#[derive(Debug, Default)]
pub struct LockTable {
    locks: DashMap<PathBuf, Arc<RwLock<()>>>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn get_lock(&self, path: &Path) -> Arc<RwLock<()>> {
        self.locks
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }

    /// Acquire a shared lock on `path`.
    pub async fn read(&self, path: &Path) -> OwnedRwLockReadGuard<()> {
        self.get_lock(path).read_owned().await
    }

    /// Acquire an exclusive lock on `path`.
    pub async fn write(&self, path: &Path) -> OwnedRwLockWriteGuard<()> {
        self.get_lock(path).write_owned().await
    }

    /// Acquire the lock `intent` requires.
    pub async fn acquire(&self, path: &Path, intent: AccessIntent) -> PathGuard {
        if intent.is_exclusive() {
            PathGuard::Exclusive(self.write(path).await)
        } else {
            PathGuard::Shared(self.read(path).await)
        }
    }

    /// Forget `path`'s lock unless someone still holds or waits on it.
    ///
    /// Call after dropping the guard. Returns whether the entry was removed.
    pub fn release(&self, path: &Path) -> bool {
        self.locks
            .remove_if(path, |_, lock| Arc::strong_count(lock) == 1)
            .is_some()
    }

    /// Remove lock entries that are not currently held.
    pub fn cleanup_unused(&self) {
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// A held cross-process lock. Dropping it releases the lock.
#[derive(Debug)]
pub(crate) struct ProcessLock {
    _file: File,
    pub(crate) locked: PathBuf,
}

/// Take the cross-process lock for `target`, polling until `timeout`.
///
/// Blocks the calling thread; run it on a blocking worker.
pub(crate) fn lock_process(
    target: &Path,
    intent: AccessIntent,
    timeout: Duration,
    poll: Duration,
) -> Result<Option<ProcessLock>, CoordinationError> {
    let Some(locked) = lock_target(target) else {
        trace!(path = %target.display(), "Nothing to lock, running unlocked");
        return Ok(None);
    };

    let file = File::open(&locked).map_err(|source| CoordinationError::Lock {
        path: locked.clone(),
        source,
    })?;

    let start = Instant::now();
    loop {
        let attempt = if intent.is_exclusive() {
            fs2::FileExt::try_lock_exclusive(&file)
        } else {
            fs2::FileExt::try_lock_shared(&file)
        };
        match attempt {
            Ok(()) => break,
            Err(e) if is_contended(&e) => {
                let waited = start.elapsed();
                if waited >= timeout {
                    return Err(CoordinationError::Timeout {
                        path: target.to_path_buf(),
                        intent,
                        waited,
                    });
                }
                std::thread::sleep(poll);
            }
            Err(source) => {
                return Err(CoordinationError::Lock {
                    path: locked,
                    source,
                });
            }
        }
    }

    trace!(path = %locked.display(), %intent, "Cross-process lock held");
    Ok(Some(ProcessLock {
        _file: file,
        locked,
    }))
}

fn lock_target(target: &Path) -> Option<PathBuf> {
    if target.exists() {
        return Some(target.to_path_buf());
    }
    target
        .parent()
        .filter(|p| p.is_dir())
        .map(Path::to_path_buf)
}

fn is_contended(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock
        || (e.raw_os_error().is_some()
            && e.raw_os_error() == fs2::lock_contended_error().raw_os_error())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_lock_table_shares_entries() {
        let table = LockTable::new();
        let path = Path::new("/tmp/a.txt");
        {
            let _r1 = table.read(path).await;
            let _r2 = table.read(path).await;
            assert_eq!(table.len(), 1);
        }
        table.cleanup_unused();
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_release_keeps_entries_in_use() {
        let table = Arc::new(LockTable::new());
        let path = PathBuf::from("/tmp/c.txt");
        let writer = table.write(&path).await;

        let t = Arc::clone(&table);
        let p = path.clone();
        let waiter = tokio::spawn(async move {
            let _r = t.read(&p).await;
        });
        tokio::task::yield_now().await;

        drop(writer);
        // The waiter still has the lock.
        assert!(!table.release(&path));
        waiter.await.unwrap();
        assert!(table.release(&path));
        assert!(table.is_empty());
        assert!(!table.release(&path));
    }

    #[tokio::test]
    async fn test_writer_waits_for_reader() {
        let table = Arc::new(LockTable::new());
        let path = PathBuf::from("/tmp/b.txt");
        let reader = table.read(&path).await;

        let t = Arc::clone(&table);
        let p = path.clone();
        let writer = tokio::spawn(async move {
            let _w = t.write(&p).await;
        });
        tokio::task::yield_now().await;
        assert!(!writer.is_finished());

        drop(reader);
        writer.await.unwrap();
    }

    #[test]
    fn test_lock_falls_back_to_parent() {
        let dir = TempDir::new().unwrap();
        let new_file = dir.path().join("new.txt");
        let lock = lock_process(
            &new_file,
            AccessIntent::Writing,
            Duration::from_millis(100),
            Duration::from_millis(10),
        )
        .unwrap()
        .unwrap();
        assert_eq!(lock.locked, dir.path());

        let orphan = dir.path().join("missing").join("new.txt");
        let none = lock_process(
            &orphan,
            AccessIntent::Writing,
            Duration::from_millis(100),
            Duration::from_millis(10),
        )
        .unwrap();
        assert!(none.is_none());
    }

    #[test]
    fn test_contended_exclusive_lock_times_out() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("busy.txt");
        std::fs::write(&path, "x").unwrap();
        let holder = File::open(&path).unwrap();
        fs2::FileExt::try_lock_exclusive(&holder).unwrap();

        let err = lock_process(
            &path,
            AccessIntent::Reading,
            Duration::from_millis(100),
            Duration::from_millis(10),
        )
        .unwrap_err();
        assert!(matches!(err, CoordinationError::Timeout { .. }));

        drop(holder);
        assert!(
            lock_process(
                &path,
                AccessIntent::Reading,
                Duration::from_millis(100),
                Duration::from_millis(10),
            )
            .unwrap()
            .is_some()
        );
    }
}
