//! Location references and cloud placeholder naming.
//!
//! Cloud providers represent content that has not been downloaded yet by a
//! hidden stand-in file next to where the real file will appear:
//! `report.pdf` is announced as `.report.pdf.icloud`. A [`LocationRef`]
//! always addresses the logical path, and remembers whether only the
//! placeholder was present when it was built.

use std::ffi::OsStr;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

/// Suffix appended to a placeholder stand-in's name.
pub const PLACEHOLDER_SUFFIX: &str = ".icloud";

/// Logical name encoded in a placeholder file name, if `name` is one.
///
/// `".report.pdf.icloud"` yields `"report.pdf"`; ordinary names yield `None`.
/// So do names whose logical part would be empty, `.` or `..`, since those
/// cannot name a sibling.
pub fn logical_name(name: &str) -> Option<&str> {
    let inner = name.strip_prefix('.')?.strip_suffix(PLACEHOLDER_SUFFIX)?;
    match inner {
        "" | "." | ".." => None,
        _ => Some(inner),
    }
}

/// Placeholder file name for a logical name.
pub fn placeholder_name(name: &str) -> String {
    format!(".{name}{PLACEHOLDER_SUFFIX}")
}

/// Path of the placeholder stand-in for a logical path.
pub fn placeholder_path(path: &Path) -> Option<PathBuf> {
    let name = path.file_name()?.to_str()?;
    Some(path.with_file_name(placeholder_name(name)))
}

/// Reference to a file or directory outside the application's own storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LocationRef {
    path: PathBuf,
    is_dir: bool,
    display_name: String,
    placeholder: bool,
}

impl LocationRef {
    /// Reference a file without touching the filesystem.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::new(path.into(), false, false)
    }

    /// Reference a directory without touching the filesystem.
    pub fn directory(path: impl Into<PathBuf>) -> Self {
        Self::new(path.into(), true, false)
    }

    pub(crate) fn new(path: PathBuf, is_dir: bool, placeholder: bool) -> Self {
        let display_name = display_name_of(&path);
        Self {
            path,
            is_dir,
            display_name,
            placeholder,
        }
    }

    /// Build a reference from what is currently on disk.
    ///
    /// Accepts either the logical path or the placeholder path; both yield a
    /// reference to the logical path.
    pub fn inspect(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();

        if let Some(logical) = path
            .file_name()
            .and_then(OsStr::to_str)
            .and_then(logical_name)
        {
            let logical_path = path.with_file_name(logical);
            return match std::fs::metadata(&logical_path) {
                Ok(meta) => Ok(Self::new(logical_path, meta.is_dir(), false)),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    std::fs::symlink_metadata(path)?;
                    Ok(Self::new(logical_path, false, true))
                }
                Err(e) => Err(e),
            };
        }

        match std::fs::metadata(path) {
            Ok(meta) => Ok(Self::new(path.to_path_buf(), meta.is_dir(), false)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let stand_in = placeholder_path(path).filter(|p| p.exists());
                match stand_in {
                    Some(_) => Ok(Self::new(path.to_path_buf(), false, true)),
                    None => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_dir(&self) -> bool {
        self.is_dir
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Whether the content was only a placeholder when this reference was built.
    pub fn is_placeholder(&self) -> bool {
        self.placeholder
    }

    pub fn placeholder_path(&self) -> Option<PathBuf> {
        placeholder_path(&self.path)
    }

    /// True when either the real item or its placeholder is present.
    pub fn exists(&self) -> bool {
        self.path.exists() || self.placeholder_path().is_some_and(|p| p.exists())
    }

    /// Compose a child location from a path relative to this one.
    ///
    /// The child is assumed to be a file unless it already exists as a
    /// directory.
    pub fn join(&self, relative: impl AsRef<Path>) -> Self {
        let path = self.path.join(relative);
        let is_dir = path.is_dir();
        Self::new(path, is_dir, false)
    }

    /// The same kind of item at a new path, as after a move.
    pub fn with_path(&self, path: impl Into<PathBuf>) -> Self {
        Self::new(path.into(), self.is_dir, self.placeholder)
    }

    pub fn parent(&self) -> Option<&Path> {
        self.path.parent()
    }
}

impl fmt::Display for LocationRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

fn display_name_of(path: &Path) -> String {
    path.file_name().map_or_else(
        || path.display().to_string(),
        |n| n.to_string_lossy().into_owned(),
    )
}
