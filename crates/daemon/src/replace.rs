//! Replacer module for moving finished files into place.
//!
//! Encodes are written to a temp directory first. This module swaps a trimmed
//! encode over the untrimmed one and moves the result to its final location,
//! never leaving a half-written file at the destination.

use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur while moving files.
#[derive(Debug, Error)]
pub enum ReplaceError {
    /// The file to move does not exist.
    #[error("Missing file: {0}")]
    Missing(PathBuf),

    /// Failed to create the destination directory.
    #[error("Failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Copying across filesystems failed.
    #[error("Failed to copy {from} -> {to}: {source}")]
    CopyFailed {
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },

    /// Removing the source after a copy failed.
    #[error("Failed to remove {path}: {source}")]
    RemoveFailed {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Path of a sibling file used for a partial copy: `<name>.part`.
pub fn partial_path(dest: &Path) -> PathBuf {
    let mut partial = dest.as_os_str().to_owned();
    partial.push(".part");
    PathBuf::from(partial)
}

/// Moves `from` to `to`, replacing `to` if it exists.
///
/// Tries a rename first (same filesystem). Otherwise copies into
/// `<to>.part`, renames that over `to` and removes `from`, so `to` only ever
/// holds a complete file.
///
/// # Arguments
///
/// * `from` - Finished file in the temp directory
/// * `to` - Final location
pub fn move_file(from: &Path, to: &Path) -> Result<(), ReplaceError> {
    if !from.exists() {
        return Err(ReplaceError::Missing(from.to_path_buf()));
    }
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }

    let partial = partial_path(to);
    let copy_err = |source| ReplaceError::CopyFailed {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        source,
    };
    if let Err(e) = fs::copy(from, &partial) {
        let _ = fs::remove_file(&partial);
        return Err(copy_err(e));
    }
    if let Err(e) = fs::rename(&partial, to) {
        let _ = fs::remove_file(&partial);
        return Err(copy_err(e));
    }
    fs::remove_file(from).map_err(|source| ReplaceError::RemoveFailed {
        path: from.to_path_buf(),
        source,
    })
}

/// Moves `file` into `dir`, creating `dir` if needed.
///
/// # Returns
///
/// The final path of the file.
pub fn move_into_dir(file: &Path, dir: &Path, name: &str) -> Result<PathBuf, ReplaceError> {
    fs::create_dir_all(dir).map_err(|source| ReplaceError::CreateDir {
        path: dir.to_path_buf(),
        source,
    })?;
    let dest = dir.join(name);
    move_file(file, &dest)?;
    Ok(dest)
}

/// Replaces `encoded` with `trimmed`; `trimmed` is consumed.
pub fn replace_with_trimmed(encoded: &Path, trimmed: &Path) -> Result<(), ReplaceError> {
    move_file(trimmed, encoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_move_file_renames() {
        let dir = TempDir::new().unwrap();
        let from = dir.path().join("a.mkv");
        let to = dir.path().join("b.mkv");
        fs::write(&from, b"encoded").unwrap();

        move_file(&from, &to).unwrap();

        assert!(!from.exists());
        assert_eq!(fs::read(&to).unwrap(), b"encoded");
        assert!(!partial_path(&to).exists());
    }

    #[test]
    fn test_move_file_missing_source() {
        let dir = TempDir::new().unwrap();
        let result = move_file(&dir.path().join("nope"), &dir.path().join("b"));
        assert!(matches!(result, Err(ReplaceError::Missing(_))));
    }

    #[test]
    fn test_replace_with_trimmed_overwrites() {
        let dir = TempDir::new().unwrap();
        let encoded = dir.path().join("1.mp4");
        let trimmed = dir.path().join("1.trim.mp4");
        fs::write(&encoded, b"full").unwrap();
        fs::write(&trimmed, b"cut").unwrap();

        replace_with_trimmed(&encoded, &trimmed).unwrap();

        assert_eq!(fs::read(&encoded).unwrap(), b"cut");
        assert!(!trimmed.exists());
    }

    #[test]
    fn test_move_into_dir_creates_user_dir() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("tmp.mp4");
        fs::write(&file, b"x").unwrap();

        let dest = move_into_dir(&file, &dir.path().join("out/someone"), "200401-1830_Lore.mp4")
            .unwrap();

        assert_eq!(dest, dir.path().join("out/someone/200401-1830_Lore.mp4"));
        assert!(dest.exists());
    }

    #[test]
    fn test_partial_path() {
        assert_eq!(
            partial_path(Path::new("/out/u/a.mkv")),
            PathBuf::from("/out/u/a.mkv.part")
        );
    }
}
