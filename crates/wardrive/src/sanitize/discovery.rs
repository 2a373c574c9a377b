//! Locating capture files on disk.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::export::wigle::{split_fields, split_records, ADDRESS_COLUMN, NAME_COLUMN};
use crate::rules::wildcard_match;

/// The two file formats the remover understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    /// A capture database.
    Kismet,
    /// An exported WiGLE CSV.
    WigleCsv,
}

impl FileKind {
    /// Classify `path` by its name.
    #[must_use]
    pub fn of(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_string_lossy().to_ascii_lowercase();
        let name = path.file_name()?.to_string_lossy().to_ascii_lowercase();
        match ext.as_str() {
            "kismet" => Some(Self::Kismet),
            "wiglecsv" => Some(Self::WigleCsv),
            "csv" if name.contains("wigle") => Some(Self::WigleCsv),
            _ => None,
        }
    }
}

/// A capture file found by [`find_capture_files`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaptureFile {
    /// Location on disk.
    pub path: PathBuf,
    /// Format.
    pub kind: FileKind,
    /// Size in bytes.
    pub size_bytes: u64,
    /// Last modification time.
    pub modified: Option<DateTime<Utc>>,
}

impl CaptureFile {
    fn from_path(path: PathBuf, kind: FileKind) -> Option<Self> {
        let meta = fs::metadata(&path).ok()?;
        if !meta.is_file() {
            return None;
        }
        Some(Self {
            path,
            kind,
            size_bytes: meta.len(),
            modified: meta.modified().ok().map(DateTime::<Utc>::from),
        })
    }
}

/// Every capture file at or below `root`, newest first.
///
/// A `root` that is itself a recognized file yields just that file.
#[must_use]
pub fn find_capture_files(root: &Path) -> Vec<CaptureFile> {
    if root.is_file() {
        return FileKind::of(root)
            .and_then(|kind| CaptureFile::from_path(root.to_path_buf(), kind))
            .into_iter()
            .collect();
    }

    let mut files: Vec<CaptureFile> = WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(error = %e, "Skipping unreadable directory entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            let kind = FileKind::of(entry.path())?;
            CaptureFile::from_path(entry.into_path(), kind)
        })
        .collect();

    files.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| a.path.cmp(&b.path)));
    debug!(root = %root.display(), found = files.len(), "Discovered capture files");
    files
}

/// Whether `address` looks like a hardware address.
fn is_address(address: &str) -> bool {
    !address.is_empty() && address.chars().all(|c| c.is_ascii_hexdigit() || c == ':')
}

/// Addresses from exported CSVs under `logs_dir` whose name matches the
/// wildcard `pattern`.
///
/// Returns unique uppercase addresses in sorted order. Unreadable files
/// are skipped.
///
/// # Errors
///
/// Returns an error if the search pattern for `logs_dir` is invalid.
pub fn historical_addresses(logs_dir: &Path, pattern: &str) -> Result<Vec<String>> {
    let search = logs_dir.join("**").join("*.wiglecsv");
    let search = search.to_string_lossy();
    let entries = glob::glob(&search)
        .map_err(|e| Error::internal(format!("bad search pattern {search}: {e}")))?;

    let mut found = BTreeSet::new();
    for path in entries.filter_map(std::result::Result::ok) {
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping unreadable CSV");
                continue;
            }
        };
        for record in split_records(&text).into_iter().skip(2) {
            let fields = split_fields(record);
            let (Some(address), Some(name)) = (fields.get(ADDRESS_COLUMN), fields.get(NAME_COLUMN))
            else {
                continue;
            };
            if is_address(address) && wildcard_match(name, pattern) {
                found.insert(address.to_ascii_uppercase());
            }
        }
    }

    Ok(found.into_iter().collect())
}

/// Seconds since `time`, saturating at zero.
#[must_use]
pub fn age_secs(time: SystemTime) -> u64 {
    SystemTime::now()
        .duration_since(time)
        .map_or(0, |age| age.as_secs())
}
