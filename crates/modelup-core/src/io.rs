use crate::error::{Result, UpgradeError};
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Atomically write `data` to `path` using a tempfile in the same directory.
/// Prevents partial writes from corrupting version files.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let dir = path.parent().unwrap_or(Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Create a directory and all parents, idempotent.
pub fn ensure_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path)?;
    Ok(())
}

/// Write a file only if it does not already exist. Returns true if written.
pub fn write_if_missing(path: &Path, data: &[u8]) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    atomic_write(path, data)?;
    Ok(true)
}

/// Recursively copy `src` into `dst`. `dst` must not exist yet.
///
/// Symlinks are recreated as symlinks, never followed. Entries that are
/// neither files, directories nor symlinks (sockets, FIFOs) are an error.
pub fn copy_dir(src: &Path, dst: &Path) -> Result<()> {
    let at = |path: &Path| {
        let path = path.to_path_buf();
        move |source: std::io::Error| UpgradeError::Copy { path, source }
    };

    std::fs::create_dir(dst).map_err(at(dst))?;
    for entry in std::fs::read_dir(src).map_err(at(src))? {
        let entry = entry.map_err(at(src))?;
        let path = entry.path();
        let target = dst.join(entry.file_name());
        let file_type = entry.file_type().map_err(at(&path))?;

        if file_type.is_dir() {
            copy_dir(&path, &target)?;
        } else if file_type.is_symlink() {
            copy_symlink(&path, &target).map_err(at(&path))?;
        } else if file_type.is_file() {
            std::fs::copy(&path, &target).map_err(at(&path))?;
        } else {
            return Err(UpgradeError::Copy {
                path,
                source: std::io::Error::new(
                    std::io::ErrorKind::Unsupported,
                    "not a file, directory or symlink",
                ),
            });
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(link: &Path, target: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(std::fs::read_link(link)?, target)
}

#[cfg(not(unix))]
fn copy_symlink(link: &Path, target: &Path) -> std::io::Result<()> {
    std::fs::copy(link, target).map(|_| ())
}

/// Remove a directory tree if present.
pub fn remove_dir_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
