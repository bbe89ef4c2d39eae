//! File coordination: mutual exclusion between processes touching the same
//! location, and notification of the presenters that show it.
//!
//! # Protocol
//!
//! Each coordinated operation is a one-shot transaction:
//!
//! 1. Other presenters of the target are asked to relinquish (flush pending
//!    state) and the coordinator waits for their acknowledgement.
//! 2. For deletion, presenters of the target are told to tear down.
//! 3. The in-process path lock is taken, then the cross-process lock.
//! 4. The accessor runs on a blocking worker.
//! 5. On success the remaining presenters are notified.
//!
//! A coordination failure means the accessor never ran. See
//! [`FileCoordinator::coordinate`].

use std::fmt;

pub mod access;
pub mod coordinator;
pub mod locks;
pub mod materialize;
pub mod presenter;

pub use access::CoordinatedFileAccess;
pub use coordinator::FileCoordinator;
pub use locks::{LockTable, PathGuard};
pub use materialize::{LocalMaterializer, Materializer};
pub use presenter::{PresenterEvent, PresenterId, PresenterRegistry};

/// What a coordinated operation intends to do with its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessIntent {
    Reading,
    Writing,
    Deleting,
}

impl AccessIntent {
    /// Writing and deleting exclude every other access.
    pub fn is_exclusive(self) -> bool {
        !matches!(self, Self::Reading)
    }
}

impl fmt::Display for AccessIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Reading => "reading",
            Self::Writing => "writing",
            Self::Deleting => "deleting",
        })
    }
}
