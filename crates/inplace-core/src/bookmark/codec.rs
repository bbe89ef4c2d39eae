//! Bookmark creation and resolution.
//!
//! A [`FileBookmarkCodec`] bookmark records the path together with the
//! file's identity (device and inode on Unix). Resolution prefers the
//! recorded path, and falls back to finding the same identity elsewhere in
//! the parent directory, which is what a rename by another process looks
//! like.

use std::fmt;
use std::fs::Metadata;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::BookmarkError;
use crate::location::LocationRef;

const BOOKMARK_VERSION: u32 = 1;

/// Opaque, persistable serialization of a location.
#[derive(Clone, PartialEq, Eq)]
pub struct Bookmark(Vec<u8>);

impl Bookmark {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl fmt::Debug for Bookmark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bookmark({} bytes)", self.0.len())
    }
}

/// Outcome of resolving a bookmark.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub location: LocationRef,
    /// The item moved or was replaced; the bookmark should be regenerated.
    pub stale: bool,
}

/// Creates and resolves bookmarks.
pub trait BookmarkCodec: Send + Sync + fmt::Debug {
    fn create(&self, location: &LocationRef) -> Result<Bookmark, BookmarkError>;

    fn resolve(&self, bookmark: &Bookmark) -> Result<Resolved, BookmarkError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct Identity {
    dev: u64,
    ino: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct Payload {
    v: u32,
    path: PathBuf,
    is_dir: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<Identity>,
}

/// Bookmarks for local and mounted filesystems.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileBookmarkCodec;

impl FileBookmarkCodec {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(unix)]
fn identity(meta: &Metadata) -> Option<Identity> {
    use std::os::unix::fs::MetadataExt;
    Some(Identity {
        dev: meta.dev(),
        ino: meta.ino(),
    })
}

#[cfg(not(unix))]
fn identity(_meta: &Metadata) -> Option<Identity> {
    None
}

/// Search `dir` for an entry with the given identity.
fn find_by_identity(dir: &Path, wanted: Identity) -> Option<PathBuf> {
    let entries = std::fs::read_dir(dir).ok()?;
    entries
        .filter_map(Result::ok)
        .find(|entry| {
            std::fs::symlink_metadata(entry.path())
                .ok()
                .and_then(|m| identity(&m))
                == Some(wanted)
        })
        .map(|entry| entry.path())
}

fn inspect(path: &Path) -> Result<LocationRef, BookmarkError> {
    LocationRef::inspect(path).map_err(|_| BookmarkError::TargetMissing {
        path: path.to_path_buf(),
    })
}

impl BookmarkCodec for FileBookmarkCodec {
    fn create(&self, location: &LocationRef) -> Result<Bookmark, BookmarkError> {
        let id = match std::fs::metadata(location.path()) {
            Ok(meta) => identity(&meta),
            // A placeholder has no stable identity until it materializes.
            Err(e) if e.kind() == io::ErrorKind::NotFound && location.exists() => None,
            Err(source) => {
                return Err(BookmarkError::Create {
                    path: location.path().to_path_buf(),
                    source,
                });
            }
        };

        let payload = Payload {
            v: BOOKMARK_VERSION,
            path: location.path().to_path_buf(),
            is_dir: location.is_dir(),
            id,
        };
        Ok(Bookmark(serde_json::to_vec(&payload)?))
    }

    fn resolve(&self, bookmark: &Bookmark) -> Result<Resolved, BookmarkError> {
        let payload: Payload = serde_json::from_slice(&bookmark.0)?;
        if payload.v != BOOKMARK_VERSION {
            return Err(BookmarkError::UnsupportedVersion(payload.v));
        }

        match std::fs::metadata(&payload.path) {
            Ok(meta) => {
                let current = identity(&meta);
                let stale = payload.id.is_some() && current != payload.id;
                if stale {
                    debug!(path = %payload.path.display(), "Bookmarked path now holds a different item");
                }
                Ok(Resolved {
                    location: inspect(&payload.path)?,
                    stale,
                })
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let location = LocationRef::file(&payload.path);
                if location.exists() {
                    return Ok(Resolved {
                        location: inspect(&payload.path)?,
                        stale: false,
                    });
                }

                let moved = payload
                    .id
                    .zip(payload.path.parent())
                    .and_then(|(id, parent)| find_by_identity(parent, id));
                match moved {
                    Some(new_path) => {
                        debug!(
                            from = %payload.path.display(),
                            to = %new_path.display(),
                            "Bookmarked item was renamed"
                        );
                        Ok(Resolved {
                            location: inspect(&new_path)?,
                            stale: true,
                        })
                    }
                    None => Err(BookmarkError::TargetMissing { path: payload.path }),
                }
            }
            Err(source) => Err(BookmarkError::Create {
                path: payload.path,
                source,
            }),
        }
    }
}
