//! File helpers shared by the rule store, the remover and the backup manager.

use std::io::Write;
use std::path::Path;
use std::time::{Duration, SystemTime};

use tempfile::NamedTempFile;

use crate::error::Result;

/// Replace `path` with `contents` via a sibling temp file and a rename.
///
/// Readers see either the old or the new file, never a partial one.
///
/// # Errors
///
/// Returns an I/O error if the temp file cannot be written or renamed.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    if let Ok(meta) = path.metadata() {
        tmp.as_file().set_permissions(meta.permissions())?;
    }
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Modification time of `path`, if it can be read.
#[must_use]
pub fn modified(path: &Path) -> Option<SystemTime> {
    path.metadata().and_then(|m| m.modified()).ok()
}

/// Whether `path` was modified less than `threshold` ago.
///
/// A file whose mtime cannot be read, or lies in the future, counts as in use.
#[must_use]
pub fn is_in_use(path: &Path, threshold: Duration) -> bool {
    match modified(path) {
        Some(mtime) => SystemTime::now()
            .duration_since(mtime)
            .map_or(true, |age| age < threshold),
        None => path.exists(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::FileTime;

    #[test]
    fn test_write_atomic_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.conf");
        std::fs::write(&path, "old").unwrap();

        write_atomic(&path, b"new").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "new");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_write_atomic_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fresh.txt");
        write_atomic(&path, b"hello").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"hello");
    }

    #[test]
    fn test_is_in_use_fresh_and_aged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.kismet");
        std::fs::write(&path, "x").unwrap();
        assert!(is_in_use(&path, Duration::from_secs(30)));

        let old = FileTime::from_system_time(SystemTime::now() - Duration::from_secs(120));
        filetime::set_file_mtime(&path, old).unwrap();
        assert!(!is_in_use(&path, Duration::from_secs(30)));
    }

    #[test]
    fn test_is_in_use_missing_file() {
        assert!(!is_in_use(Path::new("/nonexistent/file"), Duration::from_secs(30)));
        assert!(modified(Path::new("/nonexistent/file")).is_none());
    }
}
