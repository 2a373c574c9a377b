//! Pre-mutation snapshots of capture files.
//!
//! Each backup is a directory named after its creation time
//! (`YYYY-MM-DD_HHMMSS`) under the backup root. Copies keep the source's
//! permissions and timestamps, and are hashed against the source before the
//! caller is allowed to mutate anything.

use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use chrono::Local;
use filetime::FileTime;
use serde::Serialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::Config;
use crate::error::{Error, Result};

const NAME_FORMAT: &str = "%Y-%m-%d_%H%M%S";

/// One file copied into a backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackedUpFile {
    /// The original file.
    pub source: PathBuf,
    /// The copy inside the backup directory.
    pub copy: PathBuf,
    /// Size in bytes.
    pub size_bytes: u64,
    /// Hex BLAKE3 digest shared by source and copy.
    pub digest: String,
}

/// A completed backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Backup {
    /// Directory name.
    pub name: String,
    /// Backup directory.
    pub path: PathBuf,
    /// Files copied.
    pub files: Vec<BackedUpFile>,
    /// Requested files that did not exist.
    pub skipped: Vec<PathBuf>,
    /// Sum of copied file sizes.
    pub total_size_bytes: u64,
}

/// A backup found on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupSummary {
    /// Directory name.
    pub name: String,
    /// Backup directory.
    pub path: PathBuf,
    /// Number of files inside.
    pub file_count: usize,
    /// Sum of file sizes.
    pub size_bytes: u64,
}

/// Creates, lists and deletes backups under one root directory.
#[derive(Debug, Clone)]
pub struct BackupManager {
    root: PathBuf,
}

impl BackupManager {
    /// A manager for backups under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// A manager for the configured backup directory.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.backup_dir())
    }

    /// The backup root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Copy `files` into a new timestamped directory.
    ///
    /// Missing files are skipped. Every copy is verified against its
    /// source; a mismatch fails the whole backup.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created, a copy fails, or
    /// a copy does not match its source.
    pub fn create_backup(&self, files: &[PathBuf]) -> Result<Backup> {
        fs::create_dir_all(&self.root).map_err(|source| Error::DirectoryCreate {
            path: self.root.clone(),
            source,
        })?;
        let (name, path) = self.claim_directory()?;

        let mut backup = Backup {
            name,
            path,
            files: Vec::new(),
            skipped: Vec::new(),
            total_size_bytes: 0,
        };

        for source in files {
            let Ok(meta) = fs::metadata(source) else {
                warn!(path = %source.display(), "Skipping missing file");
                backup.skipped.push(source.clone());
                continue;
            };
            if !meta.is_file() {
                backup.skipped.push(source.clone());
                continue;
            }

            let copy = unique_child(&backup.path, source);
            fs::copy(source, &copy)?;
            filetime::set_file_times(
                &copy,
                FileTime::from_last_access_time(&meta),
                FileTime::from_last_modification_time(&meta),
            )?;

            let digest = hash_file(source)?;
            if hash_file(&copy)? != digest {
                return Err(Error::BackupMismatch {
                    path: source.clone(),
                });
            }

            debug!(source = %source.display(), copy = %copy.display(), "Backed up file");
            backup.total_size_bytes += meta.len();
            backup.files.push(BackedUpFile {
                source: source.clone(),
                copy,
                size_bytes: meta.len(),
                digest,
            });
        }

        info!(
            path = %backup.path.display(),
            files = backup.files.len(),
            bytes = backup.total_size_bytes,
            "Backup created"
        );
        Ok(backup)
    }

    /// Every backup under the root, newest first.
    ///
    /// A missing root yields an empty list.
    ///
    /// # Errors
    ///
    /// Returns an error if the root exists but cannot be read.
    pub fn list_backups(&self) -> Result<Vec<BackupSummary>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut backups = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let path = entry.path();
            let (file_count, size_bytes) = WalkDir::new(&path)
                .into_iter()
                .filter_map(std::result::Result::ok)
                .filter(|e| e.file_type().is_file())
                .filter_map(|e| e.metadata().ok())
                .fold((0, 0), |(count, size), meta| (count + 1, size + meta.len()));
            backups.push(BackupSummary {
                name: entry.file_name().to_string_lossy().into_owned(),
                path,
                file_count,
                size_bytes,
            });
        }

        backups.sort_by(|a, b| b.name.cmp(&a.name));
        Ok(backups)
    }

    /// Remove a backup directory and everything in it.
    ///
    /// `path` is either a backup name or a path directly under the root.
    /// A backup that does not exist is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if `path` does not name a directory directly under
    /// the backup root, or if it cannot be removed.
    pub fn delete_backup(&self, path: &Path) -> Result<()> {
        let name = backup_name(&self.root, path).ok_or_else(|| {
            Error::internal(format!(
                "refusing to delete {}: not a backup under {}",
                path.display(),
                self.root.display()
            ))
        })?;
        let target = self.root.join(name);
        if !target.exists() {
            debug!(path = %target.display(), "Backup already gone");
            return Ok(());
        }
        fs::remove_dir_all(&target)?;
        info!(path = %target.display(), "Backup deleted");
        Ok(())
    }

    /// Create a fresh directory named after the current time.
    fn claim_directory(&self) -> Result<(String, PathBuf)> {
        let stamp = Local::now().format(NAME_FORMAT).to_string();
        let mut name = stamp.clone();
        let mut suffix = 1;
        loop {
            let path = self.root.join(&name);
            match fs::create_dir(&path) {
                Ok(()) => return Ok((name, path)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    name = format!("{stamp}_{suffix}");
                    suffix += 1;
                }
                Err(source) => return Err(Error::DirectoryCreate { path, source }),
            }
        }
    }
}

/// The single plain directory name `path` refers to under `root`.
fn backup_name<'a>(root: &Path, path: &'a Path) -> Option<&'a OsStr> {
    let relative = if path.is_absolute() {
        path.strip_prefix(root).ok()?
    } else {
        path
    };
    let mut components = relative.components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(name)), None) => Some(name),
        _ => None,
    }
}

/// A path in `dir` for a copy of `source` that does not collide.
fn unique_child(dir: &Path, source: &Path) -> PathBuf {
    let file_name = source
        .file_name()
        .map_or_else(|| "file".into(), |n| n.to_string_lossy().into_owned());
    let mut candidate = dir.join(&file_name);
    let mut n = 1;
    while candidate.exists() {
        candidate = dir.join(format!("{n}-{file_name}"));
        n += 1;
    }
    candidate
}

fn hash_file(path: &Path) -> Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hasher.finalize().to_hex().to_string())
}
