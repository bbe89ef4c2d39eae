//! Named slots of opaque blobs, persisted like a small user-defaults store.
//!
//! State is persisted to a single JSON document. Blobs are stored as
//! base64 strings and the document carries a schema version:
//!
//! ```json
//! { "version": 1, "slots": { "bookmarks": ["eyJ2Ijox...", "..."] } }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_with::base64::Base64;
use serde_with::serde_as;
use tracing::warn;

use crate::error::DefaultsError;

/// Key/value store for ordered lists of blobs.
pub trait Defaults: Send + Sync + fmt::Debug {
    /// Blobs stored under `key`, or an empty list when the slot is unset.
    fn blobs(&self, key: &str) -> Result<Vec<Vec<u8>>, DefaultsError>;

    /// Replace the slot under `key`.
    fn set_blobs(&self, key: &str, blobs: &[Vec<u8>]) -> Result<(), DefaultsError>;

    fn remove(&self, key: &str) -> Result<(), DefaultsError>;
}

#[serde_as]
#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
struct Document {
    /// Schema version for future migrations
    version: u32,
    #[serde_as(as = "HashMap<_, Vec<Base64>>")]
    slots: HashMap<String, Vec<Vec<u8>>>,
}

impl Default for Document {
    fn default() -> Self {
        Self {
            version: 1,
            slots: HashMap::new(),
        }
    }
}

/// Default timeout for acquiring the defaults file lock.
const LOCK_TIMEOUT: Duration = Duration::from_secs(5);
const LOCK_POLL: Duration = Duration::from_millis(50);

/// Defaults persisted to a JSON file shared between processes.
///
/// Every access takes an exclusive lock on a sibling `.lock` file, so two
/// processes updating different slots never lose each other's writes.
#[derive(Debug, Clone)]
pub struct JsonDefaults {
    path: PathBuf,
    lock_path: PathBuf,
}

impl JsonDefaults {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let lock_path = path.with_extension("lock");
        Self { path, lock_path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Execute a function while holding an exclusive lock on the defaults
    /// file, saving the document afterwards when `write` is set.
    fn with_lock<F, R>(&self, write: bool, f: F) -> Result<R, DefaultsError>
    where
        F: FnOnce(&mut Document) -> R,
    {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| DefaultsError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let lock_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&self.lock_path)
            .map_err(|source| DefaultsError::Io {
                path: self.lock_path.clone(),
                source,
            })?;

        let start = Instant::now();
        loop {
            match fs2::FileExt::try_lock_exclusive(&lock_file) {
                Ok(()) => break,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if start.elapsed() > LOCK_TIMEOUT {
                        return Err(DefaultsError::LockTimeout {
                            path: self.lock_path.clone(),
                        });
                    }
                    std::thread::sleep(LOCK_POLL);
                }
                Err(source) => {
                    return Err(DefaultsError::Io {
                        path: self.lock_path.clone(),
                        source,
                    });
                }
            }
        }

        let mut doc = self.load_internal()?;
        let result = f(&mut doc);
        if write {
            self.save_internal(&doc)?;
        }

        // Dropping the file releases the lock.
        drop(lock_file);
        Ok(result)
    }

    fn load_internal(&self) -> Result<Document, DefaultsError> {
        let contents = match std::fs::read(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Document::default()),
            Err(source) => {
                return Err(DefaultsError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        serde_json::from_slice(&contents).map_err(|source| DefaultsError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    fn save_internal(&self, doc: &Document) -> Result<(), DefaultsError> {
        let contents = serde_json::to_vec_pretty(doc).map_err(DefaultsError::Encode)?;
        std::fs::write(&self.path, contents).map_err(|source| DefaultsError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

impl Defaults for JsonDefaults {
    fn blobs(&self, key: &str) -> Result<Vec<Vec<u8>>, DefaultsError> {
        self.with_lock(false, |doc| doc.slots.remove(key).unwrap_or_default())
    }

    fn set_blobs(&self, key: &str, blobs: &[Vec<u8>]) -> Result<(), DefaultsError> {
        self.with_lock(true, |doc| {
            doc.slots.insert(key.to_string(), blobs.to_vec());
        })
    }

    fn remove(&self, key: &str) -> Result<(), DefaultsError> {
        self.with_lock(true, |doc| {
            if doc.slots.remove(key).is_none() {
                warn!(key, "Removing unset defaults slot");
            }
        })
    }
}

/// In-memory defaults, counting writes per key.
#[derive(Debug, Default)]
pub struct MemoryDefaults {
    inner: Mutex<MemoryInner>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    slots: HashMap<String, Vec<Vec<u8>>>,
    writes: HashMap<String, usize>,
}

impl MemoryDefaults {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of times `key` was written.
    pub fn write_count(&self, key: &str) -> usize {
        self.inner.lock().writes.get(key).copied().unwrap_or(0)
    }
}

impl Defaults for MemoryDefaults {
    fn blobs(&self, key: &str) -> Result<Vec<Vec<u8>>, DefaultsError> {
        Ok(self.inner.lock().slots.get(key).cloned().unwrap_or_default())
    }

    fn set_blobs(&self, key: &str, blobs: &[Vec<u8>]) -> Result<(), DefaultsError> {
        let mut inner = self.inner.lock();
        inner.slots.insert(key.to_string(), blobs.to_vec());
        *inner.writes.entry(key.to_string()).or_insert(0) += 1;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), DefaultsError> {
        let mut inner = self.inner.lock();
        inner.slots.remove(key);
        *inner.writes.entry(key.to_string()).or_insert(0) += 1;
        Ok(())
    }
}
