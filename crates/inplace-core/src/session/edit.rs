//! Live, autosaving view of one text file.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, trace};

use super::{DELETED_TITLE, OwnerQueue, SessionEnv, SessionEvent, SessionState};
use crate::coordination::{CoordinatedFileAccess, PresenterEvent, PresenterId};
use crate::error::AccessError;
use crate::location::LocationRef;
use crate::observer::ChangeObserver;
use crate::scoped::ScopedResourceHandle;
use crate::services::notify_access;
use crate::writer::{DebouncedWriter, FlushTarget};

enum EditMsg {
    Loaded {
        generation: u64,
        result: Result<String, AccessError>,
    },
    WriteFailed(WriteFailure),
}

/// The file being edited, as of one generation of the session.
#[derive(Debug, Clone)]
struct Presented {
    location: LocationRef,
    generation: u64,
}

/// A failed save, stamped with the generation whose target it wrote.
#[derive(Debug)]
struct WriteFailure {
    generation: u64,
    error: AccessError,
}

impl fmt::Display for WriteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.error, f)
    }
}

/// Writes the session's current text to its current target.
///
/// Target and text are shared with the session so a timer flush always
/// commits the latest state.
struct EditFlush {
    access: CoordinatedFileAccess,
    target: Arc<RwLock<Option<Presented>>>,
    text: Arc<Mutex<String>>,
}

impl FlushTarget for EditFlush {
    type Error = WriteFailure;

    async fn commit(&self) -> Result<(), WriteFailure> {
        let Some(presented) = self.target.read().clone() else {
            return Ok(());
        };
        let text = self.text.lock().clone();
        self.access
            .write(&presented.location, text)
            .await
            .map_err(|error| WriteFailure {
                generation: presented.generation,
                error,
            })
    }
}

/// Editing session for a single file.
///
/// Drive it by awaiting [`next_event`](Self::next_event) in a loop; that is
/// where loads complete and presenter callbacks are handled.
pub struct EditSession {
    env: SessionEnv,
    state: SessionState,
    target: Arc<RwLock<Option<Presented>>>,
    text: Arc<Mutex<String>>,
    handle: Option<ScopedResourceHandle>,
    observer: ChangeObserver,
    queue: OwnerQueue<EditMsg>,
    writer: DebouncedWriter<EditFlush>,
    /// Bumped whenever in-flight loads and saves must be ignored.
    generation: u64,
    pending: VecDeque<SessionEvent>,
}

impl EditSession {
    pub fn new(env: SessionEnv) -> Self {
        let observer = ChangeObserver::new(Arc::clone(env.coordinator()));
        let queue = OwnerQueue::new();

        let target = Arc::new(RwLock::new(None));
        let text = Arc::new(Mutex::new(String::new()));
        let failures = queue.sender();
        let writer = DebouncedWriter::new(
            EditFlush {
                access: env.access().for_presenter(observer.presenter_id()),
                target: Arc::clone(&target),
                text: Arc::clone(&text),
            },
            env.config().quiescence,
            move |e| {
                let _ = failures.send(EditMsg::WriteFailed(e));
            },
        );

        Self {
            env,
            state: SessionState::Closed,
            target,
            text,
            handle: None,
            observer,
            queue,
            writer,
            generation: 0,
            pending: VecDeque::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn location(&self) -> Option<LocationRef> {
        self.target.read().as_ref().map(|p| p.location.clone())
    }

    pub fn text(&self) -> String {
        self.text.lock().clone()
    }

    /// Display title: the target's name, or the deleted sentinel.
    pub fn title(&self) -> String {
        if self.state == SessionState::Deleted {
            return DELETED_TITLE.to_string();
        }
        self.target
            .read()
            .as_ref()
            .map(|p| p.location.display_name().to_string())
            .unwrap_or_default()
    }

    pub fn is_dirty(&self) -> bool {
        self.writer.is_dirty()
    }

    pub fn is_observing(&self) -> bool {
        self.observer.is_registered()
    }

    pub fn presenter_id(&self) -> PresenterId {
        self.observer.presenter_id()
    }

    pub async fn open(&mut self, location: LocationRef) {
        self.retarget(Some(location)).await;
    }

    pub async fn close(&mut self) {
        self.retarget(None).await;
    }

    /// Switch to a new target, or to none.
    ///
    /// Pending edits are written to the old target first. A failure to do
    /// so is reported as an event and the edits are dropped.
    pub async fn retarget(&mut self, location: Option<LocationRef>) {
        if let Err(failure) = self.writer.flush_now().await {
            self.write_failed(failure.error);
        }
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

        info!(path = %location, "Opening edit session");
        self.present(location.clone());
        self.handle = Some(handle);
        self.observer.register(&location);
        self.writer.enable();
        self.state = SessionState::Opening;
        self.spawn_load();
    }

    /// Replace the text and schedule an autosave.
    ///
    /// Returns false (and changes nothing) unless the session is presenting.
    pub fn edit(&mut self, text: impl Into<String>) -> bool {
        if !matches!(self.state, SessionState::Open | SessionState::Background) {
            return false;
        }
        *self.text.lock() = text.into();
        self.writer.mark_dirty();
        true
    }

    /// Write pending edits now. Returns whether a write was issued.
    pub async fn flush(&self) -> Result<bool, AccessError> {
        self.writer.flush_now().await.map_err(|failure| failure.error)
    }

    /// Re-read the file. The result arrives as an event.
    pub fn reload(&mut self) {
        if matches!(
            self.state,
            SessionState::Opening | SessionState::Open | SessionState::Background
        ) {
            self.spawn_load();
        }
    }

    /// Stop observing and write out pending edits.
    pub async fn enter_background(&mut self) {
        if self.state != SessionState::Open {
            return;
        }
        self.observer.unregister();
        self.state = SessionState::Background;
        if let Err(failure) = self.writer.flush_now().await {
            self.write_failed(failure.error);
        }
    }

    /// Resume observing. Changes missed meanwhile are picked up by a reload.
    pub fn enter_foreground(&mut self) {
        if self.state != SessionState::Background {
            return;
        }
        if let Some(target) = self.location() {
            self.observer.register(&target);
        }
        self.state = SessionState::Open;
        self.spawn_load();
    }

    /// Wait for the next thing the owner should know about.
    ///
    /// Returns `None` only if every event source is gone.
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

    /// Make `location` the target of the current generation.
    fn present(&self, location: LocationRef) {
        *self.target.write() = Some(Presented {
            location,
            generation: self.generation,
        });
    }

    /// Let the file's source know it was opened.
    fn spawn_access_notification(&self) {
        let Some(location) = self.location() else {
            return;
        };
        let services = Arc::clone(self.env.services());
        tokio::spawn(async move {
            notify_access(services.as_ref(), &location).await;
        });
    }

    fn spawn_load(&mut self) {
        let Some(target) = self.location() else {
            return;
        };
        let access = self.access();
        let generation = self.generation;
        self.queue.spawn(async move {
            EditMsg::Loaded {
                generation,
                result: access.read(&target).await,
            }
        });
    }

    /// Drop everything tied to the current target.
    fn teardown(&mut self) {
        self.writer.disable();
        self.observer.unregister();
        if let Some(mut handle) = self.handle.take() {
            handle.release();
        }
        *self.target.write() = None;
        self.text.lock().clear();
        self.generation += 1;
    }

    fn become_deleted(&mut self) {
        if self.state == SessionState::Deleted {
            return;
        }
        info!(path = ?self.location().map(|l| l.path().to_path_buf()), "Edited file was deleted");
        self.teardown();
        self.state = SessionState::Deleted;
        self.pending.push_back(SessionEvent::Deleted {
            title: DELETED_TITLE.to_string(),
        });
    }

    fn write_failed(&mut self, error: AccessError) {
        if error.is_not_found() {
            self.become_deleted();
        } else {
            self.pending.push_back(SessionEvent::Error(error));
        }
    }

    fn on_message(&mut self, msg: EditMsg) {
        match msg {
            EditMsg::Loaded { generation, result } => {
                if generation != self.generation {
                    trace!(generation, current = self.generation, "Dropping stale load");
                    return;
                }
                match result {
                    Ok(text) => {
                        self.text.lock().clone_from(&text);
                        if self.state == SessionState::Opening {
                            self.state = SessionState::Open;
                            self.spawn_access_notification();
                        }
                        let title = self.title();
                        self.pending
                            .push_back(SessionEvent::ContentAvailable { title, text });
                    }
                    Err(e) if e.is_not_found() => self.become_deleted(),
                    Err(e) => self.pending.push_back(SessionEvent::Error(e)),
                }
            }
            EditMsg::WriteFailed(failure) => {
                if failure.generation != self.generation {
                    debug!(
                        generation = failure.generation,
                        current = self.generation,
                        error = %failure.error,
                        "Dropping failure of a save for a previous target"
                    );
                    return;
                }
                if self.state != SessionState::Deleted {
                    self.write_failed(failure.error);
                }
            }
        }
    }

    fn on_presenter_event(&mut self, event: PresenterEvent) {
        trace!(presenter = self.presenter_id(), ?event, "Presenter event");
        match event {
            PresenterEvent::Changed => {
                if matches!(self.state, SessionState::Opening | SessionState::Open) {
                    self.spawn_load();
                }
            }
            PresenterEvent::Moved { to } => {
                let Some(current) = self.location() else {
                    return;
                };
                let moved = current.with_path(to);
                debug!(from = %current, to = %moved, "Following moved file");
                // Loads and saves against the old path would report not-found.
                self.generation += 1;
                self.present(moved.clone());
                if let Some(handle) = self.handle.as_mut() {
                    handle.retarget(moved.clone());
                }
                self.observer.retarget(&moved);
                if self.state == SessionState::Opening {
                    self.spawn_load();
                }
                self.pending.push_back(SessionEvent::Moved { to: moved });
            }
            PresenterEvent::Deleted { ack } => {
                self.become_deleted();
                if let Some(ack) = ack {
                    let _ = ack.send(());
                }
            }
            PresenterEvent::ChildAppeared { .. } => {}
            PresenterEvent::Relinquish { intent, ack } => {
                // Flushing waits on coordination, which must not stall this loop.
                let writer = self.writer.clone();
                tokio::spawn(async move {
                    trace!(%intent, "Relinquishing");
                    writer.flush_reporting().await;
                    let _ = ack.send(());
                });
            }
        }
    }
}

impl Drop for EditSession {
    fn drop(&mut self) {
        self.writer.disable();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoordinationConfig;
    use crate::error::ServiceError;
    use crate::services::{
        AccessNotifyService, Capability, DocumentSourceService, ServiceDirectory, StatusService,
    };
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    fn env() -> SessionEnv {
        SessionEnv::local(CoordinationConfig {
            quiescence: Duration::from_millis(50),
            ..CoordinationConfig::default()
        })
    }

    /// Everything the session reports within `wait`.
    async fn drain(session: &mut EditSession, wait: Duration) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(Some(event)) = tokio::time::timeout(wait, session.next_event()).await {
            events.push(event);
        }
        events
    }

    async fn expect_content(session: &mut EditSession) -> String {
        loop {
            match session.next_event().await {
                Some(SessionEvent::ContentAvailable { text, .. }) => return text,
                Some(SessionEvent::Error(e)) => panic!("unexpected error {e}"),
                Some(_) => {}
                None => panic!("session ended"),
            }
        }
    }

    #[tokio::test]
    async fn test_open_loads_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "hello").unwrap();

        let mut session = EditSession::new(env());
        session.open(LocationRef::file(&path)).await;
        assert_eq!(session.state(), SessionState::Opening);
        assert!(!session.edit("too early"));

        assert_eq!(expect_content(&mut session).await, "hello");
        assert_eq!(session.state(), SessionState::Open);
        assert_eq!(session.title(), "notes.txt");
        assert!(session.is_observing());
    }

    #[tokio::test]
    async fn test_edit_flushes_on_close() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "hello").unwrap();

        let mut session = EditSession::new(SessionEnv::local(CoordinationConfig::default()));
        session.open(LocationRef::file(&path)).await;
        expect_content(&mut session).await;

        assert!(session.edit("goodbye"));
        assert!(session.is_dirty());
        session.close().await;

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "goodbye");
        assert_eq!(session.state(), SessionState::Closed);
        assert!(session.location().is_none());
    }

    #[tokio::test]
    async fn test_background_flushes_and_stops_observing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "a").unwrap();

        let mut session = EditSession::new(SessionEnv::local(CoordinationConfig::default()));
        session.open(LocationRef::file(&path)).await;
        expect_content(&mut session).await;

        session.edit("b");
        session.enter_background().await;
        assert_eq!(session.state(), SessionState::Background);
        assert!(!session.is_observing());
        assert!(!session.is_dirty());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "b");

        std::fs::write(&path, "c").unwrap();
        session.enter_foreground();
        assert!(session.is_observing());
        assert_eq!(expect_content(&mut session).await, "c");
    }

    #[tokio::test]
    async fn test_missing_file_becomes_deleted() {
        let dir = TempDir::new().unwrap();
        let mut session = EditSession::new(env());
        session.open(LocationRef::file(dir.path().join("gone.txt"))).await;

        match session.next_event().await {
            Some(SessionEvent::Deleted { title }) => assert_eq!(title, DELETED_TITLE),
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(session.state(), SessionState::Deleted);
        assert!(!session.is_observing());
    }

    #[tokio::test]
    async fn test_unreachable_location_is_refused() {
        let mut session = EditSession::new(env());
        session
            .open(LocationRef::file("/nonexistent-inplace-root/sub/file.txt"))
            .await;
        assert_eq!(session.state(), SessionState::Closed);
        assert!(matches!(
            session.next_event().await,
            Some(SessionEvent::Error(AccessError::AccessDenied { .. }))
        ));
    }

    #[tokio::test]
    async fn test_coordinated_write_from_elsewhere_reloads() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("shared.txt");
        std::fs::write(&path, "one").unwrap();

        let env = env();
        let mut session = EditSession::new(env.clone());
        session.open(LocationRef::file(&path)).await;
        expect_content(&mut session).await;

        // Another writer in this process: the session must relinquish
        // (its loop keeps running) and then hear about the change.
        let other = env.access();
        let target = LocationRef::file(&path);
        let writer = tokio::spawn(async move { other.write(&target, "two").await });

        assert_eq!(expect_content(&mut session).await, "two");
        writer.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_deletion_of_previous_target_is_ignored_after_retarget() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        std::fs::write(&a, "a").unwrap();
        std::fs::write(&b, "b").unwrap();

        let mut session = EditSession::new(env());
        session.open(LocationRef::file(&a)).await;
        expect_content(&mut session).await;

        // The watcher reports the deletion while nobody drives the session.
        std::fs::remove_file(&a).unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;

        session.retarget(Some(LocationRef::file(&b))).await;
        assert_eq!(expect_content(&mut session).await, "b");

        let events = drain(&mut session, Duration::from_millis(300)).await;
        assert!(
            !events.iter().any(|e| matches!(e, SessionEvent::Deleted { .. })),
            "unexpected events {events:?}"
        );
        assert_eq!(session.state(), SessionState::Open);
        assert_eq!(session.location().unwrap().path(), b.as_path());
    }

    #[tokio::test]
    async fn test_failed_save_of_previous_target_is_ignored_after_retarget() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        let a = first.path().join("a.txt");
        let b = second.path().join("b.txt");
        std::fs::write(&a, "a").unwrap();
        std::fs::write(&b, "b").unwrap();

        let env = env();
        let mut session = EditSession::new(env.clone());
        session.open(LocationRef::file(&a)).await;
        expect_content(&mut session).await;

        // A second presenter of a.txt holds up the autosave by sitting on
        // its relinquish acknowledgement.
        let mut other = ChangeObserver::new(Arc::clone(env.coordinator()));
        other.register(&LocationRef::file(&a));
        assert!(session.edit("a, edited"));
        let ack = loop {
            match other.next_event().await {
                Some(PresenterEvent::Relinquish { ack, .. }) => break ack,
                Some(_) => {}
                None => panic!("presenter channel closed"),
            }
        };

        session.retarget(Some(LocationRef::file(&b))).await;
        assert_eq!(expect_content(&mut session).await, "b");

        // The held save now fails with not-found.
        drop(other);
        first.close().unwrap();
        ack.send(()).unwrap();

        let events = drain(&mut session, Duration::from_millis(300)).await;
        assert!(
            !events
                .iter()
                .any(|e| matches!(e, SessionEvent::Deleted { .. } | SessionEvent::Error(_))),
            "unexpected events {events:?}"
        );
        assert_eq!(session.state(), SessionState::Open);
        assert_eq!(std::fs::read_to_string(&b).unwrap(), "b");
    }

    #[derive(Debug, Default)]
    struct AccessLog {
        listens: bool,
        lookups: AtomicUsize,
        notified: AtomicUsize,
    }

    #[derive(Debug)]
    struct Listener(Arc<AccessLog>);

    #[async_trait]
    impl AccessNotifyService for Listener {
        async fn did_access(&self) -> Result<(), ServiceError> {
            self.0.notified.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Debug)]
    struct Directory(Arc<AccessLog>);

    #[async_trait]
    impl ServiceDirectory for Directory {
        async fn status_service(
            &self,
            _location: &LocationRef,
        ) -> Result<Capability<Arc<dyn StatusService>>, ServiceError> {
            Ok(Capability::Unsupported)
        }

        async fn document_source_service(
            &self,
            _location: &LocationRef,
        ) -> Result<Capability<Arc<dyn DocumentSourceService>>, ServiceError> {
            Ok(Capability::Unsupported)
        }

        async fn access_notify_service(
            &self,
            _location: &LocationRef,
        ) -> Result<Capability<Arc<dyn AccessNotifyService>>, ServiceError> {
            self.0.lookups.fetch_add(1, Ordering::SeqCst);
            if self.0.listens {
                Ok(Capability::Bound(Arc::new(Listener(Arc::clone(&self.0)))))
            } else {
                Ok(Capability::Unsupported)
            }
        }
    }

    async fn open_with_log(log: &Arc<AccessLog>) -> (TempDir, EditSession) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "hello").unwrap();

        let env = env().with_services(Arc::new(Directory(Arc::clone(log))));
        let mut session = EditSession::new(env);
        session.open(LocationRef::file(&path)).await;
        expect_content(&mut session).await;
        for _ in 0..200 {
            if log.lookups.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        (dir, session)
    }

    #[tokio::test]
    async fn test_open_notifies_listening_source() {
        let log = Arc::new(AccessLog {
            listens: true,
            ..AccessLog::default()
        });
        let (_dir, mut session) = open_with_log(&log).await;
        assert_eq!(log.notified.load(Ordering::SeqCst), 1);

        // Reloads are not new accesses.
        session.reload();
        expect_content(&mut session).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(log.lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_open_skips_source_without_notifications() {
        let log = Arc::new(AccessLog::default());
        let (_dir, mut session) = open_with_log(&log).await;

        assert_eq!(log.lookups.load(Ordering::SeqCst), 1);
        assert_eq!(log.notified.load(Ordering::SeqCst), 0);
        assert_eq!(session.state(), SessionState::Open);
        assert!(drain(&mut session, Duration::from_millis(100)).await.is_empty());
    }
}
