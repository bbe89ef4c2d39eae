//! Subcommands and the state they share.

pub mod add;
pub mod cat;
pub mod edit;
pub mod list;
pub mod ls;
pub mod open;
pub mod rm;
pub mod watch;
pub mod write;

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};

use inplace_core::{
    AccessError, BookmarkStore, CoordinatedFileAccess, FileBookmarkCodec, JsonDefaults,
    LocationRef, RootBookmarks, ScopedResourceHandle, SessionEnv,
};

use crate::config::Config;

/// A command argument naming either a bookmark (`#N`, counting from 1) or a
/// filesystem path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Bookmark(usize),
    Path(PathBuf),
}

impl FromStr for Target {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.strip_prefix('#') {
            Some(index) => match index.parse::<usize>() {
                Ok(n) if n > 0 => Ok(Self::Bookmark(n)),
                _ => Err(format!("invalid bookmark index '{s}', expected #1, #2, ...")),
            },
            None if s.is_empty() => Err("empty path".to_string()),
            None => Ok(Self::Path(PathBuf::from(s))),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bookmark(n) => write!(f, "#{n}"),
            Self::Path(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Everything a command needs, built once from the configuration.
pub struct App {
    env: SessionEnv,
    defaults: Arc<JsonDefaults>,
    codec: Arc<FileBookmarkCodec>,
    bookmarks: BookmarkStore,
    app_name: String,
}

impl App {
    /// Open the bookmark store and restore the saved list.
    pub fn new(config: &Config) -> Result<Self> {
        let defaults = Arc::new(JsonDefaults::new(config.store_path()?));
        let codec = Arc::new(FileBookmarkCodec::new());
        let env = SessionEnv::local(config.coordination.clone());
        let bookmarks = BookmarkStore::new(
            Arc::clone(&defaults) as _,
            Arc::clone(&codec) as _,
            Arc::clone(env.grantor()),
        );
        let restored = bookmarks.restore();
        tracing::debug!(count = restored.len(), store = %defaults.path().display(), "Restored bookmarks");

        Ok(Self {
            env,
            defaults,
            codec,
            bookmarks,
            app_name: config.app_name().to_string(),
        })
    }

    pub fn env(&self) -> &SessionEnv {
        &self.env
    }

    pub fn access(&self) -> CoordinatedFileAccess {
        self.env.access()
    }

    pub fn bookmarks(&self) -> &BookmarkStore {
        &self.bookmarks
    }

    /// Deep-link roots, stored beside the bookmarks.
    pub fn roots(&self) -> RootBookmarks {
        RootBookmarks::new(
            Arc::clone(&self.defaults) as _,
            Arc::clone(&self.codec) as _,
            Arc::clone(self.env.grantor()),
        )
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    /// Resolve a target to a location.
    ///
    /// Paths that do not exist yet resolve to a file reference so they can
    /// be written.
    pub fn resolve(&self, target: &Target) -> Result<LocationRef> {
        match target {
            Target::Bookmark(n) => self
                .bookmarks
                .locations()
                .get(n - 1)
                .cloned()
                .with_context(|| format!("No bookmark #{n} (see `inplace list`)")),
            Target::Path(path) => {
                let path = std::path::absolute(path)
                    .with_context(|| format!("Invalid path: {}", path.display()))?;
                match LocationRef::inspect(&path) {
                    Ok(location) => Ok(location),
                    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(LocationRef::file(path)),
                    Err(e) => {
                        Err(e).with_context(|| format!("Failed to inspect {}", path.display()))
                    }
                }
            }
        }
    }

    /// Open an access grant for the duration of a command.
    pub fn grant(&self, location: &LocationRef) -> Result<ScopedResourceHandle> {
        let mut handle = ScopedResourceHandle::new(location.clone(), Arc::clone(self.env.grantor()));
        if !handle.acquire() {
            return Err(AccessError::AccessDenied {
                path: location.path().to_path_buf(),
            }
            .into());
        }
        Ok(handle)
    }
}
