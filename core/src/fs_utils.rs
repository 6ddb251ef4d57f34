//! Filesystem helpers shared by the layout engine and the writer
//!
//! Listings are sorted by name and skip hidden entries (names starting with a
//! dot), so that bookkeeping files never count as patient data.

use log::debug;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Returns `true` when the last path component starts with a dot
pub fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.starts_with('.'))
        .unwrap_or(false)
}

/// Lists the visible entries of a directory, sorted by name
pub fn list_entries(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !is_hidden(&path) {
            entries.push(path);
        }
    }
    entries.sort();
    Ok(entries)
}

/// Lists the visible regular files of a directory
pub fn list_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    Ok(list_entries(dir)?
        .into_iter()
        .filter(|path| path.is_file())
        .collect())
}

/// Lists the visible sub-directories of a directory
pub fn list_dirs(dir: &Path) -> io::Result<Vec<PathBuf>> {
    Ok(list_entries(dir)?
        .into_iter()
        .filter(|path| path.is_dir())
        .collect())
}

/// Lists every visible regular file below a directory, depth first
pub fn list_files_recursive(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in list_entries(dir)? {
        if path.is_dir() {
            files.extend(list_files_recursive(&path)?);
        } else if path.is_file() {
            files.push(path);
        }
    }
    Ok(files)
}

/// Moves a file or directory without ever overwriting the destination
///
/// Uses a rename, falling back to copy-then-remove for files when the rename
/// fails (e.g. across filesystems).
pub fn move_path(src: &Path, dst: &Path) -> io::Result<()> {
    if dst.exists() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("destination {} already exists", dst.display()),
        ));
    }
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }

    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(e) if src.is_file() => {
            debug!(
                "Rename {} -> {} failed ({}), copying instead",
                src.display(),
                dst.display(),
                e
            );
            fs::copy(src, dst)?;
            if let Err(remove_error) = fs::remove_file(src) {
                // Leave exactly one copy behind
                let _ = fs::remove_file(dst);
                return Err(remove_error);
            }
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Writes bytes so that `path` either holds the full content or does not exist
///
/// The data goes to a hidden sibling file that is synced to disk before being
/// renamed onto `path`.
pub fn write_durably(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "output path has no file name"))?;
    let partial = parent.join(format!(".{}.partial", name));

    let result = (|| {
        let mut file = File::create(&partial)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&partial, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&partial);
    }
    result?;

    // Persist the rename itself where the platform allows it
    if let Ok(dir) = File::open(parent) {
        let _ = dir.sync_all();
    }
    Ok(())
}

/// Removes a directory if it is empty, returning whether it was removed
pub fn remove_dir_if_empty(dir: &Path) -> io::Result<bool> {
    if !dir.is_dir() || fs::read_dir(dir)?.next().is_some() {
        return Ok(false);
    }
    fs::remove_dir(dir)?;
    Ok(true)
}
