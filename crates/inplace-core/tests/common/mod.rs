//! Shared fixtures for inplace-core integration tests.

#![allow(dead_code)]

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use inplace_core::location::placeholder_path;
use inplace_core::{
    BookmarkStore, CoordinationConfig, DeepLinkError, EditSession, FileBookmarkCodec,
    FileCoordinator, GrantTable, LinkDelegate, ListingSession, LocationRef, Materializer,
    MemoryDefaults, RequestId, SessionEnv, SessionEvent,
};
use tempfile::TempDir;
use url::Url;

/// How long a test waits for an asynchronous event before failing.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Coordination settings with short timeouts so failures surface quickly.
pub fn fast_config() -> CoordinationConfig {
    CoordinationConfig {
        quiescence: Duration::from_millis(100),
        lock_timeout: Duration::from_millis(300),
        lock_poll: Duration::from_millis(10),
        relinquish_timeout: Duration::from_secs(2),
        ..CoordinationConfig::default()
    }
}

pub fn local_env() -> SessionEnv {
    SessionEnv::local(fast_config())
}

/// Environment whose materializer treats placeholders as downloadable.
pub fn provider_env() -> SessionEnv {
    SessionEnv::new(
        Arc::new(FileCoordinator::new(fast_config())),
        Arc::new(PlaceholderProvider),
        Arc::new(GrantTable::new()),
    )
}

/// Bookmark store over in-memory defaults, returning both.
pub fn memory_store() -> (BookmarkStore, Arc<MemoryDefaults>) {
    let defaults = Arc::new(MemoryDefaults::new());
    let store = BookmarkStore::new(
        Arc::clone(&defaults) as _,
        Arc::new(FileBookmarkCodec::new()),
        Arc::new(GrantTable::new()),
    );
    (store, defaults)
}

/// Builds a directory tree in a temporary directory.
pub struct TreeBuilder {
    temp_dir: TempDir,
    files: Vec<(String, Vec<u8>)>,
    directories: Vec<String>,
    placeholders: Vec<String>,
}

impl TreeBuilder {
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().unwrap(),
            files: Vec::new(),
            directories: Vec::new(),
            placeholders: Vec::new(),
        }
    }

    pub fn add_file(mut self, path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        self.files.push((path.into(), content.into()));
        self
    }

    pub fn add_directory(mut self, path: impl Into<String>) -> Self {
        self.directories.push(path.into());
        self
    }

    /// Add a not-yet-downloaded item, represented only by its stand-in.
    pub fn add_placeholder(mut self, path: impl Into<String>) -> Self {
        self.placeholders.push(path.into());
        self
    }

    pub fn build(self) -> Tree {
        let root = self.temp_dir.path();
        for dir in &self.directories {
            std::fs::create_dir_all(root.join(dir)).unwrap();
        }
        for (path, content) in &self.files {
            let full = root.join(path);
            if let Some(parent) = full.parent() {
                std::fs::create_dir_all(parent).unwrap();
            }
            std::fs::write(full, content).unwrap();
        }
        for path in &self.placeholders {
            let stand_in = placeholder_path(&root.join(path)).unwrap();
            if let Some(parent) = stand_in.parent() {
                std::fs::create_dir_all(parent).unwrap();
            }
            std::fs::write(stand_in, b"").unwrap();
        }
        Tree {
            temp_dir: self.temp_dir,
        }
    }
}

/// A built tree; removed when dropped.
pub struct Tree {
    temp_dir: TempDir,
}

impl Tree {
    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.root().join(relative)
    }

    pub fn root_location(&self) -> LocationRef {
        LocationRef::directory(self.root())
    }

    pub fn file(&self, relative: &str) -> LocationRef {
        LocationRef::file(self.path(relative))
    }

    pub fn directory(&self, relative: &str) -> LocationRef {
        LocationRef::directory(self.path(relative))
    }

    pub fn read(&self, relative: &str) -> String {
        std::fs::read_to_string(self.path(relative)).unwrap()
    }
}

/// Contents a [`PlaceholderProvider`] writes when it materializes an item.
pub const DOWNLOADED: &str = "downloaded content";

/// Materializes a placeholder by replacing its stand-in with real content.
#[derive(Debug)]
pub struct PlaceholderProvider;

impl Materializer for PlaceholderProvider {
    fn needs_download(&self, location: &LocationRef) -> bool {
        !location.path().exists() && location.placeholder_path().is_some_and(|p| p.exists())
    }

    fn start_download(&self, location: &LocationRef) -> io::Result<()> {
        std::fs::write(location.path(), DOWNLOADED)?;
        if let Some(stand_in) = location.placeholder_path() {
            std::fs::remove_file(stand_in)?;
        }
        Ok(())
    }
}

/// Link delegate recording every call.
#[derive(Debug, Default)]
pub struct RecordingDelegate {
    pub opened: Vec<LocationRef>,
    pub picks: Vec<(RequestId, PathBuf)>,
    pub replies: Vec<Url>,
    pub errors: Vec<String>,
}

impl LinkDelegate for RecordingDelegate {
    fn open(&mut self, location: LocationRef) {
        self.opened.push(location);
    }

    fn pick_directory(&mut self, request: RequestId, suggested_root: &Path) {
        self.picks.push((request, suggested_root.to_path_buf()));
    }

    fn open_reply(&mut self, url: Url) -> bool {
        self.replies.push(url);
        true
    }

    fn show_error(&mut self, error: &DeepLinkError) {
        self.errors.push(error.to_string());
    }
}

/// Await edit-session events until `pred` accepts one, failing after
/// [`EVENT_TIMEOUT`].
pub async fn wait_for_edit(
    session: &mut EditSession,
    pred: impl Fn(&SessionEvent) -> bool,
) -> SessionEvent {
    tokio::time::timeout(EVENT_TIMEOUT, async {
        loop {
            match session.next_event().await {
                Some(event) if pred(&event) => return event,
                Some(_) => {}
                None => panic!("session ended"),
            }
        }
    })
    .await
    .expect("timed out waiting for session event")
}

/// Listing-session counterpart of [`wait_for_edit`].
pub async fn wait_for_listing(
    session: &mut ListingSession,
    pred: impl Fn(&SessionEvent) -> bool,
) -> SessionEvent {
    tokio::time::timeout(EVENT_TIMEOUT, async {
        loop {
            match session.next_event().await {
                Some(event) if pred(&event) => return event,
                Some(_) => {}
                None => panic!("session ended"),
            }
        }
    })
    .await
    .expect("timed out waiting for session event")
}

pub fn is_content(event: &SessionEvent) -> bool {
    matches!(event, SessionEvent::ContentAvailable { .. })
}

pub fn is_listing(event: &SessionEvent) -> bool {
    matches!(event, SessionEvent::ListingAvailable { .. })
}

pub fn is_deleted(event: &SessionEvent) -> bool {
    matches!(event, SessionEvent::Deleted { .. })
}
