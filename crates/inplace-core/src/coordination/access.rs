//! Coordinated read, write, list and delete.

use std::collections::BTreeMap;
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, instrument};

use super::coordinator::FileCoordinator;
use super::materialize::{Materializer, materialize};
use super::presenter::PresenterId;
use super::AccessIntent;
use crate::error::AccessError;
use crate::location::{LocationRef, logical_name};

/// One-shot coordinated operations on locations.
///
/// Every operation reports exactly once through its `Result`. Coordination
/// failures and I/O failures inside the coordinated region share that
/// channel, see [`AccessError`].
#[derive(Debug, Clone)]
pub struct CoordinatedFileAccess {
    coordinator: Arc<FileCoordinator>,
    materializer: Arc<dyn Materializer>,
    presenter: Option<PresenterId>,
}

impl CoordinatedFileAccess {
    pub fn new(coordinator: Arc<FileCoordinator>, materializer: Arc<dyn Materializer>) -> Self {
        Self {
            coordinator,
            materializer,
            presenter: None,
        }
    }

    /// Bind to a presenter so it is not notified of its own operations.
    pub fn for_presenter(&self, id: PresenterId) -> Self {
        Self {
            presenter: Some(id),
            ..self.clone()
        }
    }

    pub fn coordinator(&self) -> &Arc<FileCoordinator> {
        &self.coordinator
    }

    /// Read a file as UTF-8 text.
    pub async fn read(&self, location: &LocationRef) -> Result<String, AccessError> {
        self.materialize(location).await?;
        self.run("read", AccessIntent::Reading, location.path(), |p| {
            let bytes = std::fs::read(p)?;
            String::from_utf8(bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
        })
        .await
    }

    pub async fn read_bytes(&self, location: &LocationRef) -> Result<Vec<u8>, AccessError> {
        self.materialize(location).await?;
        self.run("read", AccessIntent::Reading, location.path(), |p| std::fs::read(p))
            .await
    }

    /// Overwrite a file in place.
    ///
    /// The existing file is truncated and rewritten rather than replaced,
    /// so its identity (inode) is preserved for providers that track it.
    #[instrument(level = "debug", skip_all, fields(path = %location))]
    pub async fn write(
        &self,
        location: &LocationRef,
        contents: impl Into<Vec<u8>>,
    ) -> Result<(), AccessError> {
        let contents = contents.into();
        self.run("write", AccessIntent::Writing, location.path(), move |p| {
            let mut file = std::fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(p)?;
            file.write_all(&contents)?;
            file.flush()
        })
        .await
    }

    /// List a directory, sorted by display name.
    ///
    /// Placeholder entries are reported under their logical name, and a
    /// placeholder next to its already materialized item is collapsed.
    pub async fn list(&self, location: &LocationRef) -> Result<Vec<LocationRef>, AccessError> {
        self.materialize(location).await?;
        let mut entries = self
            .run("list", AccessIntent::Reading, location.path(), list_dir)
            .await?;
        entries.sort_by(|a, b| {
            a.display_name()
                .cmp(b.display_name())
                .then_with(|| a.path().cmp(b.path()))
        });
        Ok(entries)
    }

    /// Delete a file or a whole directory tree.
    #[instrument(level = "debug", skip_all, fields(path = %location))]
    pub async fn delete(&self, location: &LocationRef) -> Result<(), AccessError> {
        self.run("delete", AccessIntent::Deleting, location.path(), |p| {
            if std::fs::symlink_metadata(p)?.is_dir() {
                std::fs::remove_dir_all(p)
            } else {
                std::fs::remove_file(p)
            }
        })
        .await
    }

    async fn materialize(&self, location: &LocationRef) -> Result<(), AccessError> {
        materialize(
            self.materializer.as_ref(),
            location,
            self.coordinator.config().materialize_timeout,
        )
        .await
    }

    async fn run<T, F>(
        &self,
        op: &'static str,
        intent: AccessIntent,
        path: &Path,
        accessor: F,
    ) -> Result<T, AccessError>
    where
        T: Send + 'static,
        F: FnOnce(&Path) -> io::Result<T> + Send + 'static,
    {
        let result = self
            .coordinator
            .coordinate(intent, path, self.presenter, accessor)
            .await?;
        result.map_err(|e| {
            debug!(op, path = %path.display(), error = %e, "Coordinated access failed");
            AccessError::io(op, path, e)
        })
    }
}

fn list_dir(dir: &Path) -> io::Result<Vec<LocationRef>> {
    let mut by_path: BTreeMap<PathBuf, LocationRef> = BTreeMap::new();

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let logical = name.to_str().and_then(logical_name);

        match logical {
            Some(logical) => {
                let path = dir.join(logical);
                by_path
                    .entry(path.clone())
                    .or_insert_with(|| LocationRef::new(path, false, true));
            }
            None => {
                let path = entry.path();
                let is_dir = std::fs::metadata(&path).is_ok_and(|m| m.is_dir());
                by_path.insert(path.clone(), LocationRef::new(path, is_dir, false));
            }
        }
    }

    Ok(by_path.into_values().collect())
}
