//! Filesystem collaborator used by the reconciler.
//!
//! Every operation must be safe to call when the target already has the
//! desired shape. [`LocalFilesystem`] is the real implementation; tests
//! inject their own to simulate failures.

use std::io;
use std::path::Path;

/// What currently sits at a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    None,
    File,
    Directory,
    /// Symlinks and special files. Never the expected kind.
    Other,
}

/// Trait abstracting filesystem access for testability.
pub trait Filesystem: Send + Sync {
    /// Inspect `path` without following symlinks.
    fn exists(&self, path: &Path) -> io::Result<PathKind>;
    /// Remove whatever is at `path`. A missing path is not an error.
    fn remove_recursive(&self, path: &Path) -> io::Result<()>;
    /// Create `path` and its parents. An existing directory is not an error.
    fn create_directory(&self, path: &Path) -> io::Result<()>;
    /// Replace the content of `path`, creating parents as needed.
    fn write_file(&self, path: &Path, content: &[u8]) -> io::Result<()>;
    /// Apply unix permission bits.
    fn set_permissions(&self, path: &Path, mode: u32) -> io::Result<()>;
}

/// The host filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFilesystem;

impl Filesystem for LocalFilesystem {
    fn exists(&self, path: &Path) -> io::Result<PathKind> {
        match std::fs::symlink_metadata(path) {
            Ok(meta) if meta.is_dir() => Ok(PathKind::Directory),
            Ok(meta) if meta.is_file() => Ok(PathKind::File),
            Ok(_) => Ok(PathKind::Other),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(PathKind::None),
            Err(e) => Err(e),
        }
    }

    fn remove_recursive(&self, path: &Path) -> io::Result<()> {
        let result = match self.exists(path)? {
            PathKind::None => return Ok(()),
            PathKind::Directory => std::fs::remove_dir_all(path),
            PathKind::File | PathKind::Other => std::fs::remove_file(path),
        };
        match result {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }

    fn create_directory(&self, path: &Path) -> io::Result<()> {
        std::fs::create_dir_all(path)
    }

    fn write_file(&self, path: &Path, content: &[u8]) -> io::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        // Write beside the target and rename so readers never see a partial file.
        let file_name = path
            .file_name()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
        let mut tmp_name = std::ffi::OsString::from(".");
        tmp_name.push(file_name);
        tmp_name.push(".stackcheck-tmp");
        let tmp = path.with_file_name(tmp_name);

        std::fs::write(&tmp, content)?;
        if let Err(e) = std::fs::rename(&tmp, path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e);
        }
        Ok(())
    }

    #[cfg(unix)]
    fn set_permissions(&self, path: &Path, mode: u32) -> io::Result<()> {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
    }

    #[cfg(not(unix))]
    fn set_permissions(&self, _path: &Path, _mode: u32) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "unix permission bits are not supported on this platform",
        ))
    }
}
