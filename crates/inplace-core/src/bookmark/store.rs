//! Ordered, persisted list of the locations the user has granted.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::codec::BookmarkCodec;
use super::defaults::Defaults;
use crate::error::BookmarkError;
use crate::location::LocationRef;
use crate::scoped::{AccessGrantor, ScopedResourceHandle};

/// Defaults key holding the granted locations.
pub const BOOKMARKS_KEY: &str = "bookmarks";

/// Outcome of a best-effort save.
#[derive(Debug, Default)]
pub struct SaveReport {
    /// Number of bookmarks persisted.
    pub saved: usize,
    /// Locations that could not be bookmarked, with the reason.
    pub failures: Vec<(LocationRef, BookmarkError)>,
}

impl SaveReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Durable mapping from granted locations to bookmarks.
///
/// Order is preserved between [`save`](Self::save) and
/// [`restore`](Self::restore), since it is the display order. Every change
/// holds the list lock until the new list is persisted, so concurrent
/// callers never overwrite each other's additions.
#[derive(Debug)]
pub struct BookmarkStore {
    defaults: Arc<dyn Defaults>,
    codec: Arc<dyn BookmarkCodec>,
    grantor: Arc<dyn AccessGrantor>,
    key: String,
    locations: Mutex<Vec<LocationRef>>,
}

impl BookmarkStore {
    pub fn new(
        defaults: Arc<dyn Defaults>,
        codec: Arc<dyn BookmarkCodec>,
        grantor: Arc<dyn AccessGrantor>,
    ) -> Self {
        Self::with_key(defaults, codec, grantor, BOOKMARKS_KEY)
    }

    pub fn with_key(
        defaults: Arc<dyn Defaults>,
        codec: Arc<dyn BookmarkCodec>,
        grantor: Arc<dyn AccessGrantor>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            defaults,
            codec,
            grantor,
            key: key.into(),
            locations: Mutex::new(Vec::new()),
        }
    }

    /// Bookmark every location and replace the persisted list.
    ///
    /// Individual failures are collected in the report and do not stop the
    /// remaining locations; only a failure to persist the list is an error.
    pub fn save(&self, locations: &[LocationRef]) -> Result<SaveReport, BookmarkError> {
        let mut current = self.locations.lock();
        let report = self.persist(locations)?;
        *current = locations.to_vec();
        Ok(report)
    }

    /// Bookmark and write `locations` without touching the in-memory list.
    fn persist(&self, locations: &[LocationRef]) -> Result<SaveReport, BookmarkError> {
        let mut report = SaveReport::default();
        let mut blobs = Vec::with_capacity(locations.len());

        for location in locations {
            let mut handle = ScopedResourceHandle::new(location.clone(), Arc::clone(&self.grantor));
            if !handle.acquire() {
                warn!(path = %location, "Skipping bookmark: access refused");
                report.failures.push((
                    location.clone(),
                    BookmarkError::AccessDenied {
                        path: location.path().to_path_buf(),
                    },
                ));
                continue;
            }

            match self.codec.create(location) {
                Ok(bookmark) => blobs.push(bookmark.into_bytes()),
                Err(e) => {
                    warn!(path = %location, error = %e, "Failed to create bookmark");
                    report.failures.push((location.clone(), e));
                }
            }
        }

        self.defaults.set_blobs(&self.key, &blobs)?;
        report.saved = blobs.len();
        debug!(
            key = %self.key,
            saved = report.saved,
            failed = report.failures.len(),
            "Saved bookmarks"
        );
        Ok(report)
    }

    /// Load and resolve the persisted list.
    ///
    /// Unresolvable entries are dropped. If any entry is stale, every
    /// resolved location is saved again, not just the stale ones.
    pub fn restore(&self) -> Vec<LocationRef> {
        let blobs = match self.defaults.blobs(&self.key) {
            Ok(blobs) => blobs,
            Err(e) => {
                warn!(key = %self.key, error = %e, "Failed to load bookmarks");
                return Vec::new();
            }
        };

        let mut current = self.locations.lock();
        let mut any_stale = false;
        let mut resolved = Vec::with_capacity(blobs.len());
        for blob in blobs {
            match self.codec.resolve(&super::Bookmark::from_bytes(blob)) {
                Ok(r) => {
                    any_stale |= r.stale;
                    resolved.push(r.location);
                }
                Err(e) => debug!(error = %e, "Dropping unresolvable bookmark"),
            }
        }

        if any_stale {
            info!(count = resolved.len(), "Refreshing stale bookmarks");
            if let Err(e) = self.persist(&resolved) {
                warn!(error = %e, "Failed to refresh stale bookmarks");
            }
        }

        current.clone_from(&resolved);
        resolved
    }

    /// Append a newly granted location and save.
    pub fn add_location(&self, location: LocationRef) -> Result<SaveReport, BookmarkError> {
        let mut current = self.locations.lock();
        let mut locations = current.clone();
        locations.push(location);
        let report = self.persist(&locations)?;
        *current = locations;
        Ok(report)
    }

    /// Forget the location at `index` and save.
    pub fn remove_location(&self, index: usize) -> Result<Option<LocationRef>, BookmarkError> {
        let mut current = self.locations.lock();
        if index >= current.len() {
            return Ok(None);
        }
        let mut locations = current.clone();
        let removed = locations.remove(index);
        self.persist(&locations)?;
        *current = locations;
        Ok(Some(removed))
    }

    /// Current in-memory list, in display order.
    pub fn locations(&self) -> Vec<LocationRef> {
        self.locations.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bookmark::{FileBookmarkCodec, MemoryDefaults};
    use crate::scoped::GrantTable;
    use tempfile::TempDir;

    fn store(defaults: Arc<MemoryDefaults>, grants: Arc<GrantTable>) -> BookmarkStore {
        BookmarkStore::new(defaults, Arc::new(FileBookmarkCodec::new()), grants)
    }

    #[test]
    fn test_save_is_best_effort() {
        let dir = TempDir::new().unwrap();
        let ok = dir.path().join("ok.txt");
        std::fs::write(&ok, "x").unwrap();
        let defaults = Arc::new(MemoryDefaults::new());
        let grants = Arc::new(GrantTable::new());
        let store = store(defaults.clone(), grants.clone());

        let report = store
            .save(&[
                LocationRef::file("/no/such/dir/file.txt"),
                LocationRef::file(&ok),
            ])
            .unwrap();

        assert_eq!(report.saved, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(defaults.blobs(BOOKMARKS_KEY).unwrap().len(), 1);
        assert_eq!(grants.total_open(), 0);
    }

    #[test]
    fn test_add_and_remove_location() {
        let dir = TempDir::new().unwrap();
        let defaults = Arc::new(MemoryDefaults::new());
        let store = store(defaults.clone(), Arc::new(GrantTable::new()));

        let a = LocationRef::directory(dir.path());
        let b_path = dir.path().join("b.txt");
        std::fs::write(&b_path, "b").unwrap();
        let b = LocationRef::file(&b_path);

        store.add_location(a.clone()).unwrap();
        store.add_location(b.clone()).unwrap();
        assert_eq!(store.locations(), vec![a.clone(), b.clone()]);

        assert_eq!(store.remove_location(0).unwrap(), Some(a));
        assert_eq!(store.remove_location(5).unwrap(), None);

        let fresh = BookmarkStore::new(
            defaults,
            Arc::new(FileBookmarkCodec::new()),
            Arc::new(GrantTable::new()),
        );
        assert_eq!(fresh.restore(), vec![b]);
    }

    #[test]
    fn test_restore_drops_missing_entries() {
        let dir = TempDir::new().unwrap();
        let keep = dir.path().join("keep.txt");
        let gone = dir.path().join("gone.txt");
        std::fs::write(&keep, "k").unwrap();
        std::fs::write(&gone, "g").unwrap();

        let defaults = Arc::new(MemoryDefaults::new());
        let store = store(defaults.clone(), Arc::new(GrantTable::new()));
        store
            .save(&[LocationRef::file(&gone), LocationRef::file(&keep)])
            .unwrap();
        std::fs::remove_file(&gone).unwrap();

        assert_eq!(store.restore(), vec![LocationRef::file(&keep)]);
        // Nothing stale, so no refresh write.
        assert_eq!(defaults.write_count(BOOKMARKS_KEY), 1);
    }

    #[test]
    fn test_concurrent_adds_all_persist() {
        let dir = TempDir::new().unwrap();
        let defaults = Arc::new(MemoryDefaults::new());
        let store = Arc::new(store(defaults.clone(), Arc::new(GrantTable::new())));

        let mut expected: Vec<LocationRef> = (0..8)
            .map(|i| {
                let path = dir.path().join(format!("{i}.txt"));
                std::fs::write(&path, "x").unwrap();
                LocationRef::file(path)
            })
            .collect();

        let threads: Vec<_> = expected
            .iter()
            .cloned()
            .map(|location| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    store.add_location(location).unwrap();
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }

        let by_path = |a: &LocationRef, b: &LocationRef| a.path().cmp(b.path());
        expected.sort_by(by_path);
        let mut listed = store.locations();
        listed.sort_by(by_path);
        assert_eq!(listed, expected);

        let fresh = BookmarkStore::new(
            defaults,
            Arc::new(FileBookmarkCodec::new()),
            Arc::new(GrantTable::new()),
        );
        let mut restored = fresh.restore();
        restored.sort_by(by_path);
        assert_eq!(restored, expected);
    }
}
