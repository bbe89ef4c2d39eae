//! Error types for coordinated access, bookmarks and collaborators.
//!
//! Every core operation reports through a single `Result`. Callers that need
//! to decide how to present a failure use [`ErrorCategory`]: deletion maps to
//! a removed state, an absent optional service is silent, and everything else
//! is worth an alert.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::coordination::{AccessIntent, PresenterId};

/// How a failure should be presented to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Dismissible alert carrying the underlying message.
    Alert,
    /// The item no longer exists; show a removed state, not an error.
    Removed,
    /// Feature unavailable; nothing to show.
    Silent,
}

/// Failure of the coordination protocol itself.
///
/// When one of these is reported the accessor was never invoked.
#[derive(Debug, Error)]
pub enum CoordinationError {
    /// Another process held an incompatible lock for longer than allowed.
    #[error("timed out after {waited:?} waiting to coordinate {intent} of {}", path.display())]
    Timeout {
        path: PathBuf,
        intent: AccessIntent,
        waited: Duration,
    },

    /// The lock itself could not be taken.
    #[error("failed to lock {}: {source}", path.display())]
    Lock {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A presenter was asked to relinquish and never acknowledged.
    #[error("presenter {presenter} did not relinquish {}", path.display())]
    RelinquishTimeout { path: PathBuf, presenter: PresenterId },

    /// The blocking worker running the accessor panicked or was cancelled.
    #[error("coordination worker for {} was lost", path.display())]
    WorkerLost { path: PathBuf },
}

/// Error reported by a coordinated file operation.
#[derive(Debug, Error)]
pub enum AccessError {
    #[error(transparent)]
    Coordination(#[from] CoordinationError),

    /// The accessor ran and failed inside the coordinated region.
    #[error("failed to {op} {}: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A cloud placeholder did not download in time.
    #[error("{} did not finish downloading within {waited:?}", path.display())]
    Materialize { path: PathBuf, waited: Duration },

    /// No access grant could be opened for the location.
    #[error("access to {} was refused", path.display())]
    AccessDenied { path: PathBuf },
}

impl AccessError {
    pub(crate) fn io(op: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            op,
            path: path.into(),
            source,
        }
    }

    /// True when the underlying object is gone.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Io { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }

    pub fn category(&self) -> ErrorCategory {
        if self.is_not_found() {
            ErrorCategory::Removed
        } else {
            ErrorCategory::Alert
        }
    }
}

/// Error creating or resolving a bookmark.
#[derive(Debug, Error)]
pub enum BookmarkError {
    #[error("cannot bookmark {}: {source}", path.display())]
    Create {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("access to {} was refused", path.display())]
    AccessDenied { path: PathBuf },

    #[error("malformed bookmark: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("unsupported bookmark version {0}")]
    UnsupportedVersion(u32),

    /// Resolution failed permanently.
    #[error("bookmarked item {} no longer exists", path.display())]
    TargetMissing { path: PathBuf },

    #[error(transparent)]
    Defaults(#[from] DefaultsError),
}

/// Error reading or writing the persisted defaults document.
#[derive(Debug, Error)]
pub enum DefaultsError {
    #[error("failed to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode defaults: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("timed out waiting for lock on {}", path.display())]
    LockTimeout { path: PathBuf },
}

/// Error handling an inbound deep link.
#[derive(Debug, Error)]
pub enum DeepLinkError {
    #[error("missing 'root' or 'path' parameters")]
    MissingParameters,

    #[error("the operation was cancelled")]
    Cancelled,

    #[error("access to {} was refused", path.display())]
    AccessDenied { path: PathBuf },

    #[error(transparent)]
    Bookmark(#[from] BookmarkError),

    #[error("no pending request with id {0}")]
    UnknownRequest(u64),
}

impl DeepLinkError {
    /// Numeric code reported through the `errorCode` reply parameter.
    pub fn code(&self) -> i64 {
        match self {
            Self::MissingParameters => 0,
            // NSUserCancelledError, what x-callback-url clients expect
            Self::Cancelled => 3072,
            Self::AccessDenied { .. } => 257,
            Self::Bookmark(BookmarkError::TargetMissing { .. }) => 4,
            Self::Bookmark(_) => 256,
            Self::UnknownRequest(_) => 1,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Cancelled => ErrorCategory::Silent,
            _ => ErrorCategory::Alert,
        }
    }
}

/// Error from an optional status or metadata service.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: &'static str,
        status: std::process::ExitStatus,
        stderr: String,
    },

    #[error("unexpected output from {program}: {output}")]
    Parse { program: &'static str, output: String },

    #[error("access to {} was refused", path.display())]
    AccessDenied { path: PathBuf },
}

impl ServiceError {
    /// A service whose backing tool is not installed is treated as absent.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Spawn { source, .. } if source.kind() == io::ErrorKind::NotFound => {
                ErrorCategory::Silent
            }
            _ => ErrorCategory::Alert,
        }
    }
}
