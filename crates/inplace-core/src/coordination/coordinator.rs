//! The in-process file coordinator.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use super::locks::{LockTable, lock_process};
use super::presenter::{PresenterEvent, PresenterId, PresenterRegistry};
use super::AccessIntent;
use crate::config::CoordinationConfig;
use crate::error::CoordinationError;

/// Serializes coordinated operations and routes presenter callbacks.
///
/// One coordinator is shared (behind an `Arc`) by every session of a
/// process; cross-process exclusion comes from the advisory locks it takes.
#[derive(Debug)]
pub struct FileCoordinator {
    locks: LockTable,
    presenters: PresenterRegistry,
    /// Paths this process changed recently, for suppressing our own
    /// filesystem events.
    recent: DashMap<PathBuf, Instant>,
    config: CoordinationConfig,
}

impl FileCoordinator {
    pub fn new(config: CoordinationConfig) -> Self {
        Self {
            locks: LockTable::new(),
            presenters: PresenterRegistry::new(),
            recent: DashMap::new(),
            config,
        }
    }

    pub fn config(&self) -> &CoordinationConfig {
        &self.config
    }

    pub fn presenters(&self) -> &PresenterRegistry {
        &self.presenters
    }

    pub fn locks(&self) -> &LockTable {
        &self.locks
    }

    /// Run `accessor` on `target` under coordination.
    ///
    /// The outer `Result` is the coordination outcome: when it is `Err` the
    /// accessor was never invoked. The inner `io::Result` is whatever the
    /// accessor returned. The presenter in `excluding` (the caller's own) is
    /// neither asked to relinquish nor notified.
    pub async fn coordinate<T, F>(
        &self,
        intent: AccessIntent,
        target: &Path,
        excluding: Option<PresenterId>,
        accessor: F,
    ) -> Result<io::Result<T>, CoordinationError>
    where
        T: Send + 'static,
        F: FnOnce(&Path) -> io::Result<T> + Send + 'static,
    {
        self.relinquish(intent, target, excluding).await?;
        if intent == AccessIntent::Deleting {
            self.accommodate_deletion(target, excluding).await?;
        }

        let guard = self.locks.acquire(target, intent).await;
        let path = target.to_path_buf();
        let timeout = self.config.lock_timeout;
        let poll = self.config.lock_poll;

        let joined = tokio::task::spawn_blocking(move || -> Result<_, CoordinationError> {
            let existed = path.exists();
            let _lock = lock_process(&path, intent, timeout, poll)?;
            Ok((existed, accessor(&path)))
        })
        .await;
        drop(guard);
        self.locks.release(target);

        let (existed, result) = joined.map_err(|e| {
            warn!(path = %target.display(), error = %e, "Coordination worker failed");
            CoordinationError::WorkerLost {
                path: target.to_path_buf(),
            }
        })??;

        if result.is_ok() {
            self.notify_completed(intent, target, excluding, existed);
        }
        Ok(result)
    }

    /// True when this process changed `path` within the echo window.
    pub fn is_recent_local_change(&self, path: &Path) -> bool {
        self.recent
            .get(path)
            .is_some_and(|at| at.elapsed() < self.config.echo_window)
    }

    async fn relinquish(
        &self,
        intent: AccessIntent,
        target: &Path,
        excluding: Option<PresenterId>,
    ) -> Result<(), CoordinationError> {
        let mut acks = Vec::new();
        for (id, sink) in self.presenters.item_presenters(target, excluding) {
            let (ack, rx) = oneshot::channel();
            if sink.send(PresenterEvent::Relinquish { intent, ack }).is_ok() {
                acks.push((id, rx));
            }
        }
        self.await_acks(target, acks, "relinquish").await
    }

    async fn accommodate_deletion(
        &self,
        target: &Path,
        excluding: Option<PresenterId>,
    ) -> Result<(), CoordinationError> {
        let mut acks = Vec::new();
        for (id, sink) in self.presenters.presenters_at_or_below(target, excluding) {
            let (ack, rx) = oneshot::channel();
            if sink.send(PresenterEvent::Deleted { ack: Some(ack) }).is_ok() {
                acks.push((id, rx));
            }
        }
        self.await_acks(target, acks, "accommodate deletion").await
    }

    async fn await_acks(
        &self,
        target: &Path,
        acks: Vec<(PresenterId, oneshot::Receiver<()>)>,
        what: &'static str,
    ) -> Result<(), CoordinationError> {
        if acks.is_empty() {
            return Ok(());
        }
        debug!(path = %target.display(), presenters = acks.len(), what, "Waiting for presenters");

        let deadline = tokio::time::Instant::now() + self.config.relinquish_timeout;
        for (presenter, rx) in acks {
            // A dropped receiver means the presenter went away: nothing to wait for.
            if tokio::time::timeout_at(deadline, rx).await.is_err() {
                warn!(presenter, path = %target.display(), what, "Presenter did not acknowledge");
                return Err(CoordinationError::RelinquishTimeout {
                    path: target.to_path_buf(),
                    presenter,
                });
            }
        }
        Ok(())
    }

    fn notify_completed(
        &self,
        intent: AccessIntent,
        target: &Path,
        excluding: Option<PresenterId>,
        existed: bool,
    ) {
        match intent {
            AccessIntent::Reading => {}
            AccessIntent::Writing => {
                self.record_local_change(target);
                for (_, sink) in self.presenters.item_presenters(target, excluding) {
                    let _ = sink.send(PresenterEvent::Changed);
                }
                if !existed {
                    for (_, sink) in self.presenters.parent_presenters(target, excluding) {
                        let _ = sink.send(PresenterEvent::ChildAppeared {
                            path: target.to_path_buf(),
                        });
                    }
                }
            }
            AccessIntent::Deleting => {
                self.record_local_change(target);
                for (_, sink) in self.presenters.parent_presenters(target, excluding) {
                    let _ = sink.send(PresenterEvent::Changed);
                }
            }
        }
    }

    fn record_local_change(&self, path: &Path) {
        let window = self.config.echo_window;
        self.recent.retain(|_, at| at.elapsed() < window);
        self.recent.insert(path.to_path_buf(), Instant::now());
        trace!(path = %path.display(), "Recorded local change");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::LocationRef;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    fn coordinator() -> Arc<FileCoordinator> {
        Arc::new(FileCoordinator::new(CoordinationConfig {
            lock_timeout: Duration::from_millis(200),
            lock_poll: Duration::from_millis(10),
            relinquish_timeout: Duration::from_millis(200),
            ..CoordinationConfig::default()
        }))
    }

    #[tokio::test]
    async fn test_relinquish_is_acknowledged_before_access() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "a").unwrap();
        let coord = coordinator();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = coord.presenters().allocate_id();
        coord.presenters().register(id, &LocationRef::file(&path), tx);

        let flushed = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&flushed);
        let presenter = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let PresenterEvent::Relinquish { ack, .. } = event {
                    flag.store(true, Ordering::SeqCst);
                    let _ = ack.send(());
                }
            }
        });

        let seen = Arc::clone(&flushed);
        let result = coord
            .coordinate(AccessIntent::Reading, &path, None, move |p| {
                assert!(seen.load(Ordering::SeqCst));
                std::fs::read_to_string(p)
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result, "a");

        coord.presenters().unregister(id);
        presenter.abort();
    }

    #[tokio::test]
    async fn test_silent_presenter_times_out() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "a").unwrap();
        let coord = coordinator();

        let (tx, _rx) = mpsc::unbounded_channel();
        let id = coord.presenters().allocate_id();
        coord.presenters().register(id, &LocationRef::file(&path), tx);

        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let err = coord
            .coordinate(AccessIntent::Writing, &path, None, move |_| {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinationError::RelinquishTimeout { presenter, .. } if presenter == id));
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_write_notifies_others_but_not_self() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("new.txt");
        let coord = coordinator();

        let (self_tx, mut self_rx) = mpsc::unbounded_channel();
        let (dir_tx, mut dir_rx) = mpsc::unbounded_channel();
        let me = coord.presenters().allocate_id();
        let lister = coord.presenters().allocate_id();
        coord.presenters().register(me, &LocationRef::file(&path), self_tx);
        coord
            .presenters()
            .register(lister, &LocationRef::directory(dir.path()), dir_tx);

        coord
            .coordinate(AccessIntent::Writing, &path, Some(me), |p| std::fs::write(p, "x"))
            .await
            .unwrap()
            .unwrap();

        assert!(self_rx.try_recv().is_err());
        match dir_rx.try_recv().unwrap() {
            PresenterEvent::ChildAppeared { path: child } => assert_eq!(child, path),
            other => panic!("unexpected event {other:?}"),
        }
        assert!(coord.is_recent_local_change(&path));
    }

    #[tokio::test]
    async fn test_inner_error_is_passed_through() {
        let dir = TempDir::new().unwrap();
        let coord = coordinator();
        let outcome = coord
            .coordinate(AccessIntent::Reading, &dir.path().join("nope"), None, |p| {
                std::fs::read(p)
            })
            .await
            .unwrap();
        assert_eq!(outcome.unwrap_err().kind(), io::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_lock_entries_are_dropped_after_access() {
        let dir = TempDir::new().unwrap();
        let coord = coordinator();

        let mut tasks = Vec::new();
        for i in 0..8 {
            let coord = Arc::clone(&coord);
            let path = dir.path().join(format!("{}.txt", i % 3));
            tasks.push(tokio::spawn(async move {
                coord
                    .coordinate(AccessIntent::Writing, &path, None, |p| std::fs::write(p, "x"))
                    .await
                    .unwrap()
                    .unwrap();
                coord
                    .coordinate(AccessIntent::Reading, &path, None, |p| std::fs::read(p))
                    .await
                    .unwrap()
                    .unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert!(coord.locks().is_empty());

        // A failed access releases its entry too.
        let missing = dir.path().join("missing").join("a.txt");
        let outcome = coord
            .coordinate(AccessIntent::Reading, &missing, None, |p| std::fs::read(p))
            .await
            .unwrap();
        assert!(outcome.is_err());
        assert_eq!(coord.locks().len(), 0);
    }
}
