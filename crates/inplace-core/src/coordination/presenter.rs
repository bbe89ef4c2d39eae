//! Presenter registrations.
//!
//! A presenter is this process saying "I am showing or editing this
//! location". The coordinator routes relinquish requests and change
//! notifications to presenters through their event sink.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use super::AccessIntent;
use crate::location::LocationRef;

/// Identifier of a presenter, stable across unregister and re-register.
pub type PresenterId = u64;

/// Notification delivered to a presenter.
///
/// Events arrive on an unspecified worker context; the receiver must apply
/// them on its owner context.
#[derive(Debug)]
pub enum PresenterEvent {
    /// Content changed outside this presenter.
    Changed,
    /// The item was renamed or moved.
    Moved { to: PathBuf },
    /// The item was deleted. When `ack` is present the deleter is waiting
    /// for the presenter to tear down.
    Deleted { ack: Option<oneshot::Sender<()>> },
    /// A new item appeared in a presented directory.
    ChildAppeared { path: PathBuf },
    /// Someone else wants access; flush pending state, then acknowledge.
    Relinquish {
        intent: AccessIntent,
        ack: oneshot::Sender<()>,
    },
}

#[derive(Debug)]
struct Registration {
    path: PathBuf,
    is_dir: bool,
    sink: mpsc::UnboundedSender<PresenterEvent>,
}

/// Presenters registered in this process.
#[derive(Debug)]
pub struct PresenterRegistry {
    /// Starts at 1, 0 is never handed out.
    next_id: AtomicU64,
    presenters: DashMap<PresenterId, Registration>,
}

impl Default for PresenterRegistry {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            presenters: DashMap::new(),
        }
    }
}

impl PresenterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve an id for a presenter that will register later.
    pub fn allocate_id(&self) -> PresenterId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Register (or re-register) presenter `id` for `location`.
    pub fn register(
        &self,
        id: PresenterId,
        location: &LocationRef,
        sink: mpsc::UnboundedSender<PresenterEvent>,
    ) {
        debug!(presenter = id, path = %location, "Registering presenter");
        self.presenters.insert(
            id,
            Registration {
                path: location.path().to_path_buf(),
                is_dir: location.is_dir(),
                sink,
            },
        );
    }

    /// Returns whether the presenter was registered.
    pub fn unregister(&self, id: PresenterId) -> bool {
        let removed = self.presenters.remove(&id).is_some();
        if removed {
            debug!(presenter = id, "Unregistered presenter");
        }
        removed
    }

    /// Point a registered presenter at a new path.
    pub fn retarget(&self, id: PresenterId, path: &Path) {
        if let Some(mut reg) = self.presenters.get_mut(&id) {
            path.clone_into(&mut reg.path);
        }
    }

    pub fn is_registered(&self, id: PresenterId) -> bool {
        self.presenters.contains_key(&id)
    }

    pub fn path_of(&self, id: PresenterId) -> Option<PathBuf> {
        self.presenters.get(&id).map(|r| r.path.clone())
    }

    pub fn len(&self) -> usize {
        self.presenters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.presenters.is_empty()
    }

    /// Presenters of `path` itself or of anything below it.
    pub(crate) fn presenters_at_or_below(
        &self,
        path: &Path,
        excluding: Option<PresenterId>,
    ) -> Vec<(PresenterId, mpsc::UnboundedSender<PresenterEvent>)> {
        self.select(excluding, |reg| reg.path.starts_with(path))
    }

    /// Presenters of exactly `path`.
    pub(crate) fn item_presenters(
        &self,
        path: &Path,
        excluding: Option<PresenterId>,
    ) -> Vec<(PresenterId, mpsc::UnboundedSender<PresenterEvent>)> {
        self.select(excluding, |reg| reg.path == path)
    }

    /// Directory presenters of the directory containing `path`.
    pub(crate) fn parent_presenters(
        &self,
        path: &Path,
        excluding: Option<PresenterId>,
    ) -> Vec<(PresenterId, mpsc::UnboundedSender<PresenterEvent>)> {
        let Some(parent) = path.parent() else {
            return Vec::new();
        };
        self.select(excluding, |reg| reg.is_dir && reg.path == parent)
    }

    fn select(
        &self,
        excluding: Option<PresenterId>,
        pred: impl Fn(&Registration) -> bool,
    ) -> Vec<(PresenterId, mpsc::UnboundedSender<PresenterEvent>)> {
        self.presenters
            .iter()
            .filter(|e| Some(*e.key()) != excluding && pred(e.value()))
            .map(|e| (*e.key(), e.value().sink.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique_and_nonzero() {
        let registry = PresenterRegistry::new();
        let a = registry.allocate_id();
        let b = registry.allocate_id();
        assert_eq!(a, 1);
        assert_ne!(a, b);
    }

    #[test]
    fn test_lookup_by_relationship() {
        let registry = PresenterRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();

        let dir = registry.allocate_id();
        let file = registry.allocate_id();
        let other = registry.allocate_id();
        registry.register(dir, &LocationRef::directory("/docs"), tx.clone());
        registry.register(file, &LocationRef::file("/docs/a.txt"), tx.clone());
        registry.register(other, &LocationRef::file("/docs/a.txt"), tx);

        let items: Vec<_> = registry
            .item_presenters(Path::new("/docs/a.txt"), Some(file))
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(items, vec![other]);

        let parents: Vec<_> = registry
            .parent_presenters(Path::new("/docs/a.txt"), None)
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(parents, vec![dir]);

        assert_eq!(
            registry
                .presenters_at_or_below(Path::new("/docs"), None)
                .len(),
            3
        );

        registry.retarget(other, Path::new("/docs/b.txt"));
        assert_eq!(registry.path_of(other).unwrap(), Path::new("/docs/b.txt"));
        assert!(registry.unregister(other));
        assert!(!registry.unregister(other));
        assert_eq!(registry.len(), 2);
    }
}
