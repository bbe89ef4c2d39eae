//! Live view of a directory's entries.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{debug, info, trace};

use super::{DELETED_TITLE, OwnerQueue, SessionEnv, SessionEvent, SessionState};
use crate::coordination::{CoordinatedFileAccess, PresenterEvent, PresenterId};
use crate::error::AccessError;
use crate::location::LocationRef;
use crate::observer::ChangeObserver;
use crate::scoped::ScopedResourceHandle;

enum ListingMsg {
    Listed {
        generation: u64,
        result: Result<Vec<LocationRef>, AccessError>,
    },
    EntryDeleted(LocationRef),
    DeleteFailed {
        generation: u64,
        error: AccessError,
    },
}

/// Browsing session for one directory.
pub struct ListingSession {
    env: SessionEnv,
    state: SessionState,
    target: Option<LocationRef>,
    entries: Vec<LocationRef>,
    handle: Option<ScopedResourceHandle>,
    observer: ChangeObserver,
    queue: OwnerQueue<ListingMsg>,
    generation: u64,
    pending: VecDeque<SessionEvent>,
}

impl ListingSession {
    pub fn new(env: SessionEnv) -> Self {
        let observer = ChangeObserver::new(Arc::clone(env.coordinator()));
        Self {
            env,
            state: SessionState::Closed,
            target: None,
            entries: Vec::new(),
            handle: None,
            observer,
            queue: OwnerQueue::new(),
            generation: 0,
            pending: VecDeque::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn location(&self) -> Option<&LocationRef> {
        self.target.as_ref()
    }

    pub fn entries(&self) -> &[LocationRef] {
        &self.entries
    }

    pub fn title(&self) -> String {
        match (&self.target, self.state) {
            (_, SessionState::Deleted) => DELETED_TITLE.to_string(),
            (Some(target), _) => target.display_name().to_string(),
            (None, _) => String::new(),
        }
    }

    pub fn is_observing(&self) -> bool {
        self.observer.is_registered()
    }

    pub fn presenter_id(&self) -> PresenterId {
        self.observer.presenter_id()
    }

    pub fn open(&mut self, location: LocationRef) {
        self.retarget(Some(location));
    }

    pub fn close(&mut self) {
        self.retarget(None);
    }

    pub fn retarget(&mut self, location: Option<LocationRef>) {
        self.teardown();

        let Some(location) = location else {
            self.state = SessionState::Closed;
            return;
        };

        let mut handle = ScopedResourceHandle::new(location.clone(), Arc::clone(self.env.grantor()));
        if !handle.acquire() {
            self.state = SessionState::Closed;
            self.pending.push_back(SessionEvent::Error(AccessError::AccessDenied {
                path: location.path().to_path_buf(),
            }));
            return;
        }

        info!(path = %location, "Opening listing session");
        self.observer.register(&location);
        self.handle = Some(handle);
        self.target = Some(location);
        self.state = SessionState::Opening;
        self.spawn_list();
    }

    /// Re-list the directory. The result arrives as an event.
    pub fn reload(&mut self) {
        if matches!(
            self.state,
            SessionState::Opening | SessionState::Open | SessionState::Background
        ) {
            self.spawn_list();
        }
    }

    /// Delete the entry at `index`.
    ///
    /// The entry disappears from the listing immediately; if the delete then
    /// fails, an error is reported and the directory is listed again.
    pub fn delete_entry(&mut self, index: usize) -> bool {
        if self.state != SessionState::Open || index >= self.entries.len() {
            return false;
        }
        let entry = self.entries.remove(index);
        debug!(path = %entry, "Deleting entry");
        let title = self.title();
        self.pending.push_back(SessionEvent::ListingAvailable {
            title,
            entries: self.entries.clone(),
        });

        let access = self.access();
        let generation = self.generation;
        self.queue.spawn(async move {
            match access.delete(&entry).await {
                Ok(()) => ListingMsg::EntryDeleted(entry),
                Err(error) => ListingMsg::DeleteFailed { generation, error },
            }
        });
        true
    }

    pub fn enter_background(&mut self) {
        if self.state != SessionState::Open {
            return;
        }
        self.observer.unregister();
        self.state = SessionState::Background;
    }

    pub fn enter_foreground(&mut self) {
        if self.state != SessionState::Background {
            return;
        }
        if let Some(target) = &self.target {
            self.observer.register(target);
        }
        self.state = SessionState::Open;
        self.spawn_list();
    }

    /// Wait for the next thing the owner should know about.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }
            tokio::select! {
                Some(event) = self.observer.next_event() => self.on_presenter_event(event),
                Some(msg) = self.queue.recv() => self.on_message(msg),
                else => return None,
            }
        }
    }

    fn access(&self) -> CoordinatedFileAccess {
        self.env.access().for_presenter(self.observer.presenter_id())
    }

    fn spawn_list(&mut self) {
        let Some(target) = self.target.clone() else {
            return;
        };
        let access = self.access();
        let generation = self.generation;
        self.queue.spawn(async move {
            ListingMsg::Listed {
                generation,
                result: access.list(&target).await,
            }
        });
    }

    fn teardown(&mut self) {
        self.observer.unregister();
        if let Some(mut handle) = self.handle.take() {
            handle.release();
        }
        self.target = None;
        self.entries.clear();
        self.generation += 1;
    }

    fn become_deleted(&mut self) {
        if self.state == SessionState::Deleted {
            return;
        }
        info!(path = ?self.target.as_ref().map(LocationRef::path), "Listed directory was deleted");
        self.teardown();
        self.state = SessionState::Deleted;
        self.pending.push_back(SessionEvent::Deleted {
            title: DELETED_TITLE.to_string(),
        });
    }

    fn on_message(&mut self, msg: ListingMsg) {
        match msg {
            ListingMsg::Listed { generation, .. } if generation != self.generation => {
                trace!(generation, current = self.generation, "Dropping stale listing");
            }
            ListingMsg::Listed { result, .. } => match result {
                Ok(entries) => {
                    self.entries = entries;
                    if self.state == SessionState::Opening {
                        self.state = SessionState::Open;
                    }
                    let title = self.title();
                    self.pending.push_back(SessionEvent::ListingAvailable {
                        title,
                        entries: self.entries.clone(),
                    });
                }
                Err(e) if e.is_not_found() => self.become_deleted(),
                Err(e) => self.pending.push_back(SessionEvent::Error(e)),
            },
            ListingMsg::EntryDeleted(entry) => {
                // Already removed from the listing.
                trace!(path = %entry, "Entry deleted");
            }
            ListingMsg::DeleteFailed { generation, error } => {
                self.pending.push_back(SessionEvent::Error(error));
                if generation == self.generation {
                    self.spawn_list();
                }
            }
        }
    }

    fn on_presenter_event(&mut self, event: PresenterEvent) {
        trace!(presenter = self.presenter_id(), ?event, "Presenter event");
        match event {
            PresenterEvent::Changed | PresenterEvent::ChildAppeared { .. } => {
                if matches!(self.state, SessionState::Opening | SessionState::Open) {
                    self.spawn_list();
                }
            }
            PresenterEvent::Moved { to } => {
                let Some(current) = self.target.take() else {
                    return;
                };
                let moved = current.with_path(to);
                debug!(from = %current, to = %moved, "Following moved directory");
                if let Some(handle) = self.handle.as_mut() {
                    handle.retarget(moved.clone());
                }
                self.observer.retarget(&moved);
                self.target = Some(moved.clone());
                self.generation += 1;
                self.spawn_list();
                self.pending.push_back(SessionEvent::Moved { to: moved });
            }
            PresenterEvent::Deleted { ack } => {
                self.become_deleted();
                if let Some(ack) = ack {
                    let _ = ack.send(());
                }
            }
            PresenterEvent::Relinquish { ack, .. } => {
                // Nothing is ever pending in a listing.
                let _ = ack.send(());
            }
        }
    }
}
