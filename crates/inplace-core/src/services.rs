//! Optional services offered for a location by whatever stores it.
//!
//! Services are discovered per location and may simply not exist there: a
//! lookup that finds nothing yields [`Capability::Unsupported`], never an
//! error. The bundled [`GitServices`] binds for locations inside a git work
//! tree.

use std::ffi::OsStr;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, trace};

use crate::error::ServiceError;
use crate::location::LocationRef;
use crate::scoped::{AccessGrantor, ScopedResourceHandle};

const GIT: &str = "git";

/// How a file differs from its last committed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeSummary {
    /// Unchanged since the last commit.
    Current,
    Lines { added: u64, deleted: u64 },
    /// Binary content changed; line counts do not apply.
    BinaryModified,
}

impl ChangeSummary {
    pub fn from_counts(added: u64, deleted: u64) -> Self {
        if added == 0 && deleted == 0 {
            Self::Current
        } else {
            Self::Lines { added, deleted }
        }
    }

    /// Sum `git diff --numstat` output. Binary entries report `-` counts.
    pub fn from_numstat(output: &str) -> Option<Self> {
        let mut added = 0u64;
        let mut deleted = 0u64;
        let mut binary = false;

        for line in output.lines().filter(|l| !l.trim().is_empty()) {
            let mut fields = line.split('\t');
            let (a, d) = (fields.next()?, fields.next()?);
            if a == "-" || d == "-" {
                binary = true;
                continue;
            }
            added += a.parse::<u64>().ok()?;
            deleted += d.parse::<u64>().ok()?;
        }

        Some(if binary {
            Self::BinaryModified
        } else {
            Self::from_counts(added, deleted)
        })
    }
}

impl fmt::Display for ChangeSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Current => f.write_str("current"),
            Self::Lines { added, deleted } => write!(f, "+{added} -{deleted}"),
            Self::BinaryModified => f.write_str("modified (binary)"),
        }
    }
}

/// Result of a service lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capability<T> {
    Bound(T),
    Unsupported,
}

impl<T> Capability<T> {
    pub fn is_bound(&self) -> bool {
        matches!(self, Self::Bound(_))
    }

    pub fn bound(self) -> Option<T> {
        match self {
            Self::Bound(service) => Some(service),
            Self::Unsupported => None,
        }
    }
}

/// Describes the application or tool that stores a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentSourceInfo {
    /// Path relative to the source's own storage root.
    pub path: PathBuf,
    pub app_name: String,
    pub app_version: Option<String>,
    /// PNG-encoded icon, if the source has one.
    pub icon: Option<Vec<u8>>,
}

#[async_trait]
pub trait StatusService: Send + Sync + fmt::Debug {
    async fn fetch_status(&self) -> Result<ChangeSummary, ServiceError>;
}

#[async_trait]
pub trait DocumentSourceService: Send + Sync + fmt::Debug {
    async fn document_source(&self) -> Result<DocumentSourceInfo, ServiceError>;
}

/// Lets the document's source know the document was opened, for sources
/// that keep recents or usage statistics.
#[async_trait]
pub trait AccessNotifyService: Send + Sync + fmt::Debug {
    async fn did_access(&self) -> Result<(), ServiceError>;
}

/// Per-location service discovery.
#[async_trait]
pub trait ServiceDirectory: Send + Sync + fmt::Debug {
    async fn status_service(
        &self,
        location: &LocationRef,
    ) -> Result<Capability<Arc<dyn StatusService>>, ServiceError>;

    async fn document_source_service(
        &self,
        location: &LocationRef,
    ) -> Result<Capability<Arc<dyn DocumentSourceService>>, ServiceError>;

    /// Most sources do not care about accesses.
    async fn access_notify_service(
        &self,
        _location: &LocationRef,
    ) -> Result<Capability<Arc<dyn AccessNotifyService>>, ServiceError> {
        Ok(Capability::Unsupported)
    }
}

/// Tell `location`'s source that it was accessed, if the source listens.
///
/// Returns whether a notification was delivered. Failures are logged and
/// otherwise ignored; nothing about opening a document depends on them.
pub async fn notify_access(services: &dyn ServiceDirectory, location: &LocationRef) -> bool {
    let service = match services.access_notify_service(location).await {
        Ok(Capability::Bound(service)) => service,
        Ok(Capability::Unsupported) => {
            trace!(path = %location, "Source does not take access notifications");
            return false;
        }
        Err(e) => {
            debug!(path = %location, error = %e, "Access notification lookup failed");
            return false;
        }
    };
    match service.did_access().await {
        Ok(()) => {
            trace!(path = %location, "Notified source of access");
            true
        }
        Err(e) => {
            debug!(path = %location, error = %e, "Access notification failed");
            false
        }
    }
}

/// Directory that never finds anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoServices;

#[async_trait]
impl ServiceDirectory for NoServices {
    async fn status_service(
        &self,
        _location: &LocationRef,
    ) -> Result<Capability<Arc<dyn StatusService>>, ServiceError> {
        Ok(Capability::Unsupported)
    }

    async fn document_source_service(
        &self,
        _location: &LocationRef,
    ) -> Result<Capability<Arc<dyn DocumentSourceService>>, ServiceError> {
        Ok(Capability::Unsupported)
    }
}

/// Services backed by the `git` command line for items in a work tree.
///
/// Locations outside a work tree, or machines without `git`, are
/// unsupported.
#[derive(Debug, Clone)]
pub struct GitServices {
    grantor: Arc<dyn AccessGrantor>,
}

impl GitServices {
    pub fn new(grantor: Arc<dyn AccessGrantor>) -> Self {
        Self { grantor }
    }

    async fn repo_for(&self, location: &LocationRef) -> Result<Capability<Arc<GitRepo>>, ServiceError> {
        let mut handle = ScopedResourceHandle::new(location.clone(), Arc::clone(&self.grantor));
        if !handle.acquire() {
            return Err(ServiceError::AccessDenied {
                path: location.path().to_path_buf(),
            });
        }

        let dir = if location.is_dir() {
            location.path()
        } else {
            location.parent().unwrap_or(location.path())
        };
        let top = match git(dir, ["rev-parse", "--show-toplevel"]).await {
            Ok(out) => PathBuf::from(out.trim()),
            Err(e) => {
                debug!(path = %location, error = %e, "No git work tree");
                return Ok(Capability::Unsupported);
            }
        };

        // git reports the work tree with symlinks resolved.
        let path = tokio::fs::canonicalize(location.path())
            .await
            .unwrap_or_else(|_| location.path().to_path_buf());
        trace!(path = %path.display(), top = %top.display(), "Bound git services");
        handle.release();
        Ok(Capability::Bound(Arc::new(GitRepo { top, path })))
    }
}

#[async_trait]
impl ServiceDirectory for GitServices {
    async fn status_service(
        &self,
        location: &LocationRef,
    ) -> Result<Capability<Arc<dyn StatusService>>, ServiceError> {
        Ok(match self.repo_for(location).await? {
            Capability::Bound(repo) => Capability::Bound(repo as Arc<dyn StatusService>),
            Capability::Unsupported => Capability::Unsupported,
        })
    }

    async fn document_source_service(
        &self,
        location: &LocationRef,
    ) -> Result<Capability<Arc<dyn DocumentSourceService>>, ServiceError> {
        Ok(match self.repo_for(location).await? {
            Capability::Bound(repo) => Capability::Bound(repo as Arc<dyn DocumentSourceService>),
            Capability::Unsupported => Capability::Unsupported,
        })
    }
}

/// An item inside a git work tree.
#[derive(Debug)]
struct GitRepo {
    top: PathBuf,
    path: PathBuf,
}

#[async_trait]
impl StatusService for GitRepo {
    async fn fetch_status(&self) -> Result<ChangeSummary, ServiceError> {
        let out = git(
            &self.top,
            [
                OsStr::new("diff"),
                OsStr::new("--numstat"),
                OsStr::new("HEAD"),
                OsStr::new("--"),
                self.path.as_os_str(),
            ],
        )
        .await?;
        ChangeSummary::from_numstat(&out).ok_or(ServiceError::Parse {
            program: GIT,
            output: out,
        })
    }
}

#[async_trait]
impl DocumentSourceService for GitRepo {
    async fn document_source(&self) -> Result<DocumentSourceInfo, ServiceError> {
        let version = git(&self.top, ["--version"]).await?;
        let path = self
            .path
            .strip_prefix(&self.top)
            .unwrap_or(&self.path)
            .to_path_buf();
        Ok(DocumentSourceInfo {
            path,
            app_name: GIT.to_string(),
            app_version: version.trim().rsplit(' ').next().map(str::to_string),
            icon: None,
        })
    }
}

async fn git<I, S>(dir: &Path, args: I) -> Result<String, ServiceError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = Command::new(GIT)
        .arg("-C")
        .arg(dir)
        .args(args)
        .output()
        .await
        .map_err(|source| ServiceError::Spawn {
            program: GIT,
            source,
        })?;

    if !output.status.success() {
        return Err(ServiceError::Failed {
            program: GIT,
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    String::from_utf8(output.stdout).map_err(|e| ServiceError::Parse {
        program: GIT,
        output: String::from_utf8_lossy(e.as_bytes()).into_owned(),
    })
}
