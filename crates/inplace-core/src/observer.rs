//! Change observation for a presented file or directory.
//!
//! A [`ChangeObserver`] combines two sources of [`PresenterEvent`]s:
//!
//! - the coordinator, which tells in-process presenters directly about
//!   operations other sessions performed;
//! - a `notify` watcher, which reports changes made by other processes.
//!
//! Raw watcher events are serialized through one operation queue per
//! observer (a tokio task created on first registration and reused for the
//! observer's lifetime) and classified there. Events for paths the
//! coordinator itself just changed are dropped, since in-process presenters
//! already heard about those.
//!
//! Every registration gets its own event channel. Re-registering, following
//! a move or unregistering drops the previous channel together with whatever
//! was still queued in it, so nothing about an earlier target is ever
//! delivered for the current one.

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::coordination::{FileCoordinator, PresenterEvent, PresenterId};
use crate::location::LocationRef;

/// What the queue is currently watching.
#[derive(Debug, Clone)]
struct Watched {
    path: PathBuf,
    is_dir: bool,
    /// Distinguishes registrations of the same observer.
    epoch: u64,
    sink: mpsc::UnboundedSender<PresenterEvent>,
}

type RawEvent = notify::Result<Event>;

struct Registration {
    location: LocationRef,
    /// `None` when the filesystem watch could not be set up.
    watcher: Option<RecommendedWatcher>,
    events: mpsc::UnboundedReceiver<PresenterEvent>,
}

/// Presenter registration plus filesystem watch for one location.
pub struct ChangeObserver {
    coordinator: Arc<FileCoordinator>,
    id: PresenterId,
    epoch: u64,
    watched: Arc<RwLock<Option<Watched>>>,
    queue: OnceLock<mpsc::UnboundedSender<RawEvent>>,
    registration: Option<Registration>,
}

impl ChangeObserver {
    /// Create an unregistered observer.
    pub fn new(coordinator: Arc<FileCoordinator>) -> Self {
        let id = coordinator.presenters().allocate_id();
        Self {
            coordinator,
            id,
            epoch: 0,
            watched: Arc::new(RwLock::new(None)),
            queue: OnceLock::new(),
            registration: None,
        }
    }

    pub fn presenter_id(&self) -> PresenterId {
        self.id
    }

    pub fn is_registered(&self) -> bool {
        self.registration.is_some()
    }

    /// Whether a filesystem watch is active, not just the presenter.
    pub fn is_watching(&self) -> bool {
        self.registration
            .as_ref()
            .is_some_and(|r| r.watcher.is_some())
    }

    pub fn location(&self) -> Option<&LocationRef> {
        self.registration.as_ref().map(|r| &r.location)
    }

    /// Next event for the current registration.
    ///
    /// Never resolves while unregistered, which makes it safe to poll from
    /// a `select!` loop regardless of state.
    pub async fn next_event(&mut self) -> Option<PresenterEvent> {
        match self.registration.as_mut() {
            Some(registration) => registration.events.recv().await,
            None => std::future::pending().await,
        }
    }

    /// Start presenting `location`. Must be called within a tokio runtime.
    ///
    /// Replaces any previous registration. A watch that cannot be set up is
    /// logged; in-process notifications keep working without it.
    pub fn register(&mut self, location: &LocationRef) {
        self.unregister();

        let (sink, events) = mpsc::unbounded_channel();
        self.epoch += 1;
        self.coordinator
            .presenters()
            .register(self.id, location, sink.clone());
        *self.watched.write() = Some(Watched {
            path: location.path().to_path_buf(),
            is_dir: location.is_dir(),
            epoch: self.epoch,
            sink,
        });

        let watcher = match self.watch(location) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                warn!(path = %location, error = %e, "Failed to watch location, external changes will be missed");
                None
            }
        };
        self.registration = Some(Registration {
            location: location.clone(),
            watcher,
            events,
        });
    }

    /// Stop presenting. Safe to call when not registered.
    pub fn unregister(&mut self) {
        if let Some(registration) = self.registration.take() {
            self.coordinator.presenters().unregister(self.id);
            *self.watched.write() = None;
            drop(registration.watcher);
            trace!(presenter = self.id, path = %registration.location, "Observer unregistered");
        }
    }

    /// Follow the item to a new location, keeping the same presenter id.
    pub fn retarget(&mut self, location: &LocationRef) {
        if self.is_registered() {
            self.register(location);
        }
    }

    fn watch(&self, location: &LocationRef) -> notify::Result<RecommendedWatcher> {
        let queue = self.queue().clone();
        let mut watcher = notify::recommended_watcher(move |res: RawEvent| {
            let _ = queue.send(res);
        })?;

        // Files are watched through their directory so renames and
        // re-creation are seen.
        let target = if location.is_dir() {
            location.path()
        } else {
            location.parent().unwrap_or(location.path())
        };
        watcher.watch(target, RecursiveMode::NonRecursive)?;
        debug!(presenter = self.id, path = %target.display(), "Watching");
        Ok(watcher)
    }

    fn queue(&self) -> &mpsc::UnboundedSender<RawEvent> {
        self.queue.get_or_init(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            tokio::spawn(run_queue(
                rx,
                Arc::clone(&self.coordinator),
                Arc::clone(&self.watched),
                self.id,
            ));
            tx
        })
    }
}

impl Drop for ChangeObserver {
    fn drop(&mut self) {
        self.unregister();
    }
}

/// How long a "moved away" waits for its destination before it counts as
/// a deletion.
const RENAME_GRACE: Duration = Duration::from_millis(100);

/// Watcher event in presenter terms, before delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Observed {
    Changed,
    Moved(PathBuf),
    /// Renamed with the destination not (yet) known.
    MovedAway,
    Deleted,
    ChildAppeared(PathBuf),
}

async fn run_queue(
    mut rx: mpsc::UnboundedReceiver<RawEvent>,
    coordinator: Arc<FileCoordinator>,
    watched: Arc<RwLock<Option<Watched>>>,
    presenter: PresenterId,
) {
    let mut batch = Vec::new();
    // Epoch of the registration whose item was renamed away.
    let mut moved_away: Option<u64> = None;

    loop {
        let received = if let Some(epoch) = moved_away {
            match tokio::time::timeout(RENAME_GRACE, rx.recv_many(&mut batch, 64)).await {
                Ok(n) => n,
                Err(_) => {
                    moved_away = None;
                    let current = watched.read().clone();
                    match current {
                        Some(current) if current.epoch == epoch => {
                            debug!(presenter, "Item moved out of view");
                            let _ = current.sink.send(PresenterEvent::Deleted { ack: None });
                        }
                        _ => trace!(presenter, epoch, "Dropping rename of a previous registration"),
                    }
                    continue;
                }
            }
        } else {
            rx.recv_many(&mut batch, 64).await
        };
        if received == 0 {
            return;
        }

        let Some(current) = watched.read().clone() else {
            batch.clear();
            moved_away = None;
            continue;
        };
        if moved_away.is_some_and(|epoch| epoch != current.epoch) {
            moved_away = None;
        }

        // Bursts (an editor saving) collapse into one `Changed`.
        let mut changed = false;
        for raw in batch.drain(..) {
            let event = match raw {
                Ok(event) => event,
                Err(e) => {
                    warn!(presenter, error = %e, "Watch error");
                    continue;
                }
            };
            let Some((observed, subject)) = classify(&event, &current.path, current.is_dir)
            else {
                continue;
            };
            if coordinator.is_recent_local_change(&subject) {
                trace!(presenter, path = %subject.display(), "Dropping echo of local change");
                continue;
            }
            trace!(presenter, ?observed, "External change");

            let delivered = match observed {
                Observed::Changed => {
                    changed = true;
                    continue;
                }
                Observed::MovedAway => {
                    moved_away = Some(current.epoch);
                    continue;
                }
                Observed::Moved(to) => {
                    moved_away = None;
                    PresenterEvent::Moved { to }
                }
                Observed::Deleted => {
                    moved_away = None;
                    PresenterEvent::Deleted { ack: None }
                }
                Observed::ChildAppeared(path) => PresenterEvent::ChildAppeared { path },
            };
            // A closed sink means the registration ended while this batch ran.
            let _ = current.sink.send(delivered);
        }
        if changed {
            let _ = current.sink.send(PresenterEvent::Changed);
        }
    }
}

/// Map a raw watcher event onto the presenter vocabulary.
///
/// Returns the observation together with the path it concerns, used for
/// echo suppression. `watched` is the presented item; for files the watch
/// is on the parent directory, so unrelated siblings must be filtered out.
fn classify(event: &Event, watched: &Path, is_dir: bool) -> Option<(Observed, PathBuf)> {
    let is_self = |p: &PathBuf| p == watched;
    let is_child = |p: &PathBuf| is_dir && p.parent() == Some(watched);
    let first = event.paths.first()?;

    let observed = match &event.kind {
        EventKind::Access(_) | EventKind::Modify(ModifyKind::Metadata(_)) => return None,

        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let to = event.paths.get(1)?;
            if is_self(first) {
                return Some((Observed::Moved(to.clone()), first.clone()));
            }
            // Something renamed over the file (atomic save), or a child renamed.
            if (is_self(to) && !is_dir) || is_child(first) || is_child(to) {
                return Some((Observed::Changed, to.clone()));
            }
            return None;
        }

        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            if is_child(first) {
                Observed::ChildAppeared(first.clone())
            } else if is_self(first) && !is_dir {
                Observed::Changed
            } else {
                return None;
            }
        }

        EventKind::Modify(ModifyKind::Name(_)) => {
            if is_self(first) {
                Observed::MovedAway
            } else if is_child(first) {
                Observed::Changed
            } else {
                return None;
            }
        }

        EventKind::Remove(_) => {
            if is_self(first) {
                Observed::Deleted
            } else if is_child(first) {
                Observed::Changed
            } else {
                return None;
            }
        }

        EventKind::Create(_) => {
            if is_child(first) {
                Observed::ChildAppeared(first.clone())
            } else if is_self(first) && !is_dir {
                Observed::Changed
            } else {
                return None;
            }
        }

        EventKind::Modify(_) | EventKind::Any | EventKind::Other => {
            if is_self(first) && !is_dir {
                Observed::Changed
            } else {
                return None;
            }
        }
    };
    Some((observed, first.clone()))
}
