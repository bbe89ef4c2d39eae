//! Root directories granted for deep-link opening.
//!
//! Kept apart from the user's visible list. Lookups fix the persisted slot
//! as they go: entries that no longer resolve are removed and stale entries
//! are regenerated individually.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

use super::codec::{Bookmark, BookmarkCodec};
use super::defaults::Defaults;
use crate::error::BookmarkError;
use crate::location::LocationRef;
use crate::scoped::{AccessGrantor, ScopedResourceHandle};

/// Defaults key holding deep-link root bookmarks.
pub const ROOT_BOOKMARKS_KEY: &str = "open-in-place.bookmarks";

#[derive(Debug)]
pub struct RootBookmarks {
    defaults: Arc<dyn Defaults>,
    codec: Arc<dyn BookmarkCodec>,
    grantor: Arc<dyn AccessGrantor>,
}

impl RootBookmarks {
    pub fn new(
        defaults: Arc<dyn Defaults>,
        codec: Arc<dyn BookmarkCodec>,
        grantor: Arc<dyn AccessGrantor>,
    ) -> Self {
        Self {
            defaults,
            codec,
            grantor,
        }
    }

    /// First remembered root whose path lies at or below `root`.
    pub fn location_for_root(&self, root: &Path) -> Option<LocationRef> {
        let blobs = match self.defaults.blobs(ROOT_BOOKMARKS_KEY) {
            Ok(blobs) => blobs,
            Err(e) => {
                warn!(error = %e, "Failed to load root bookmarks");
                return None;
            }
        };

        let mut fixed: Option<Vec<Vec<u8>>> = None;
        let mut found = None;

        for blob in &blobs {
            let resolved = self.codec.resolve(&Bookmark::from_bytes(blob.clone()));
            let (location, stale) = match resolved {
                Ok(r) => (Some(r.location), r.stale),
                Err(e) => {
                    debug!(error = %e, "Removing unresolvable root bookmark");
                    (None, false)
                }
            };

            if location.is_none() || stale {
                let slot = fixed.get_or_insert_with(|| blobs.clone());
                slot.retain(|b| b != blob);
                if let Some(loc) = location.as_ref().filter(|_| stale) {
                    match self.bookmark(loc) {
                        Ok(fresh) => slot.push(fresh.into_bytes()),
                        Err(e) => warn!(path = %loc, error = %e, "Failed to refresh root bookmark"),
                    }
                }
            }

            if let Some(loc) = location.filter(|l| l.path().starts_with(root)) {
                found = Some(loc);
                break;
            }
        }

        if let Some(slot) = fixed {
            if let Err(e) = self.defaults.set_blobs(ROOT_BOOKMARKS_KEY, &slot) {
                warn!(error = %e, "Failed to write back root bookmarks");
            }
        }
        found
    }

    /// Persist a root picked by the user.
    pub fn remember_root(&self, location: &LocationRef) -> Result<(), BookmarkError> {
        let bookmark = self.bookmark(location)?;
        let mut blobs = self.defaults.blobs(ROOT_BOOKMARKS_KEY)?;
        blobs.push(bookmark.into_bytes());
        self.defaults.set_blobs(ROOT_BOOKMARKS_KEY, &blobs)?;
        debug!(path = %location, "Remembered deep-link root");
        Ok(())
    }

    fn bookmark(&self, location: &LocationRef) -> Result<Bookmark, BookmarkError> {
        let mut handle = ScopedResourceHandle::new(location.clone(), Arc::clone(&self.grantor));
        if !handle.acquire() {
            return Err(BookmarkError::AccessDenied {
                path: location.path().to_path_buf(),
            });
        }
        self.codec.create(location)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bookmark::{FileBookmarkCodec, MemoryDefaults};
    use crate::scoped::GrantTable;
    use tempfile::TempDir;

    fn roots(defaults: Arc<MemoryDefaults>) -> RootBookmarks {
        RootBookmarks::new(
            defaults,
            Arc::new(FileBookmarkCodec::new()),
            Arc::new(GrantTable::new()),
        )
    }

    #[test]
    fn test_unknown_root_is_none() {
        let dir = TempDir::new().unwrap();
        let roots = roots(Arc::new(MemoryDefaults::new()));
        assert!(roots.location_for_root(dir.path()).is_none());
    }

    #[test]
    fn test_remembered_root_matches_by_component() {
        let dir = TempDir::new().unwrap();
        let docs = dir.path().join("Docs");
        std::fs::create_dir(&docs).unwrap();
        let roots = roots(Arc::new(MemoryDefaults::new()));
        roots.remember_root(&LocationRef::directory(&docs)).unwrap();

        let found = roots.location_for_root(&docs).unwrap();
        assert_eq!(found.path(), docs);
        assert!(found.is_dir());
        // "Doc" is a string prefix of "Docs" but not a path prefix.
        assert!(roots.location_for_root(&dir.path().join("Doc")).is_none());
    }

    #[test]
    fn test_missing_roots_are_removed() {
        let dir = TempDir::new().unwrap();
        let gone = dir.path().join("Gone");
        let kept = dir.path().join("Kept");
        std::fs::create_dir(&gone).unwrap();
        std::fs::create_dir(&kept).unwrap();

        let defaults = Arc::new(MemoryDefaults::new());
        let roots = roots(defaults.clone());
        roots.remember_root(&LocationRef::directory(&gone)).unwrap();
        roots.remember_root(&LocationRef::directory(&kept)).unwrap();
        std::fs::remove_dir(&gone).unwrap();

        assert!(roots.location_for_root(&kept).is_some());
        assert_eq!(defaults.blobs(ROOT_BOOKMARKS_KEY).unwrap().len(), 1);
    }
}
