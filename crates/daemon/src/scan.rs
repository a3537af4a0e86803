//! Scanner module for listing the recordings in the source directory.
//!
//! Only the top level of the directory is listed; the retention scheduler
//! re-lists it on every update instead of caching the result.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

/// A file the retention scheduler may track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// File name without directory.
    pub name: String,
    /// Full path.
    pub path: PathBuf,
    /// Last modified time, if the filesystem reports one.
    pub modified: Option<SystemTime>,
}

/// Checks whether `path` has one of `extensions` (without dot, case-insensitive).
pub fn has_tracked_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

/// Lists tracked files directly inside `dir`, sorted by name.
///
/// Hidden files and names in `blacklist` are skipped. A missing directory is
/// an error so callers notice misconfiguration.
pub fn list_source_files(
    dir: &Path,
    extensions: &[String],
    blacklist: &HashSet<String>,
) -> io::Result<Vec<SourceFile>> {
    if !dir.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} is not a directory", dir.display()),
        ));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str() else {
            continue;
        };
        if name.starts_with('.') || blacklist.contains(name) {
            continue;
        }
        if !has_tracked_extension(entry.path(), extensions) {
            continue;
        }
        let modified = entry.metadata().ok().and_then(|m| m.modified().ok());
        files.push(SourceFile {
            name: name.to_string(),
            path: entry.path().to_path_buf(),
            modified,
        });
    }
    files.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(files)
}
