//! Scoped access grants for locations outside the application's storage.
//!
//! A grant is permission to touch a location for a bounded time. The holder
//! tracks how many grants it has open per path; a [`ScopedResourceHandle`]
//! owns at most one and guarantees it is released exactly once, including
//! on drop.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, trace};

use crate::location::LocationRef;

/// Source of access grants.
pub trait AccessGrantor: Send + Sync + fmt::Debug {
    /// Open a grant for `location`. Returns false when access is refused.
    fn start_accessing(&self, location: &LocationRef) -> bool;

    /// Close one grant previously opened for `location`.
    fn stop_accessing(&self, location: &LocationRef);
}

/// Grant bookkeeping for ordinary filesystem locations.
///
/// Access is refused only when neither the item, its placeholder, nor its
/// parent directory exists (a new file may be created inside an existing
/// directory).
#[derive(Debug, Default)]
pub struct GrantTable {
    open: DashMap<PathBuf, usize>,
}

impl GrantTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of grants currently open for `path`.
    pub fn open_grants(&self, path: &Path) -> usize {
        self.open.get(path).map_or(0, |n| *n)
    }

    /// Number of grants currently open across all paths.
    pub fn total_open(&self) -> usize {
        self.open.iter().map(|e| *e.value()).sum()
    }
}

impl AccessGrantor for GrantTable {
    fn start_accessing(&self, location: &LocationRef) -> bool {
        let reachable = location.exists() || location.parent().is_some_and(Path::is_dir);
        if !reachable {
            debug!(path = %location, "Refusing access grant: location unreachable");
            return false;
        }
        let mut count = self.open.entry(location.path().to_path_buf()).or_insert(0);
        *count += 1;
        trace!(path = %location, open = *count, "Access grant opened");
        true
    }

    fn stop_accessing(&self, location: &LocationRef) {
        let path = location.path();
        let remaining = match self.open.get_mut(path) {
            Some(mut count) => {
                *count = count.saturating_sub(1);
                *count
            }
            None => return,
        };
        if remaining == 0 {
            self.open.remove_if(path, |_, n| *n == 0);
        }
        trace!(path = %location, open = remaining, "Access grant closed");
    }
}

/// One logical consumer's grant on a location.
pub struct ScopedResourceHandle {
    location: LocationRef,
    grantor: Arc<dyn AccessGrantor>,
    held: bool,
}

impl ScopedResourceHandle {
    pub fn new(location: LocationRef, grantor: Arc<dyn AccessGrantor>) -> Self {
        Self {
            location,
            grantor,
            held: false,
        }
    }

    /// Open a grant. Returns whether a new grant was actually opened.
    ///
    /// Acquiring while already held is a no-op and returns false.
    pub fn acquire(&mut self) -> bool {
        if self.held {
            return false;
        }
        self.held = self.grantor.start_accessing(&self.location);
        self.held
    }

    /// Close the grant if one is held.
    pub fn release(&mut self) {
        if std::mem::take(&mut self.held) {
            self.grantor.stop_accessing(&self.location);
        }
    }

    /// Point the handle at a new location, moving any held grant with it.
    pub fn retarget(&mut self, location: LocationRef) {
        let was_held = self.held;
        self.release();
        self.location = location;
        if was_held {
            self.acquire();
        }
    }

    /// Re-verify the location still exists before using it after an await.
    pub fn is_valid(&self) -> bool {
        self.location.exists()
    }

    pub fn is_held(&self) -> bool {
        self.held
    }

    pub fn location(&self) -> &LocationRef {
        &self.location
    }
}

impl fmt::Debug for ScopedResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedResourceHandle")
            .field("location", &self.location)
            .field("held", &self.held)
            .finish_non_exhaustive()
    }
}

impl Drop for ScopedResourceHandle {
    fn drop(&mut self) {
        self.release();
    }
}
