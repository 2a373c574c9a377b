//! Post-capture removal of dynamically excluded devices.
//!
//! A pass always starts with a non-mutating scan. The caller shows the
//! resulting [`Preview`], obtains confirmation, and only then calls
//! [`apply`], which backs up every affected file before touching it.

mod discovery;
mod interactive;
mod remover;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::backup::{Backup, BackupManager};
use crate::capture::ProtocolFamily;
use crate::error::{Error, Result};
use crate::fsutil;
use crate::kismetdb::DeleteStats;
use crate::rules::{MatchType, PhyMatchers};

pub use discovery::{age_secs, find_capture_files, historical_addresses, CaptureFile, FileKind};
pub use interactive::{run_interactive, InteractiveOutcome, Prompt, StdioPrompt};
pub use remover::{process_file, process_kismetdb, process_wigle_csv};

/// Whether a pass may write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Report what would be removed.
    Scan,
    /// Remove it.
    Apply,
}

/// One record flagged by a rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleMatch {
    /// The name that matched.
    pub name: String,
    /// Address of the record, for reporting only.
    pub address: String,
    /// Value of the matching rule.
    pub matched_rule: String,
    /// Match type of the matching rule.
    pub match_type: MatchType,
    /// Family of the record.
    pub family: ProtocolFamily,
}

/// Outcome of one pass over one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessingResult {
    /// The file.
    pub target: PathBuf,
    /// Its format.
    pub kind: FileKind,
    /// Whether this was a mutating pass.
    pub applied: bool,
    /// Devices (database) or data rows (CSV) before the pass.
    pub original_count: usize,
    /// Records removed, or that would be removed by a scan.
    pub removed_count: usize,
    /// Every flagged record.
    pub matches: Vec<RuleMatch>,
    /// Rows deleted per table, database passes only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted: Option<DeleteStats>,
    /// False if the pass failed; nothing was written in that case.
    pub success: bool,
    /// Failure message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProcessingResult {
    pub(crate) fn new(target: &Path, kind: FileKind, mode: Mode) -> Self {
        Self {
            target: target.to_path_buf(),
            kind,
            applied: mode == Mode::Apply,
            original_count: 0,
            removed_count: 0,
            matches: Vec::new(),
            deleted: None,
            success: true,
            error: None,
        }
    }

    pub(crate) fn fail(&mut self, err: &Error) {
        self.success = false;
        self.error = Some(err.to_string());
        self.removed_count = 0;
        self.deleted = None;
    }
}

/// Matched records per rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleTally {
    /// Rule value.
    pub rule: String,
    /// Rule match type.
    pub match_type: MatchType,
    /// Records matched across all files.
    pub count: usize,
}

/// A file left alone because it is still being written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedFile {
    /// The file.
    pub path: PathBuf,
    /// Seconds since its last modification.
    pub age_secs: u64,
}

impl SkippedFile {
    fn new(path: PathBuf) -> Self {
        let age = fsutil::modified(&path).map_or(0, age_secs);
        warn!(path = %path.display(), age_secs = age, "Skipping file in use");
        Self { path, age_secs: age }
    }
}

/// Result of scanning a file or directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Preview {
    /// Per-file scan results, newest file first.
    pub files: Vec<ProcessingResult>,
    /// Files skipped as in use.
    pub skipped_in_use: Vec<SkippedFile>,
    /// Matched records per rule, most matches first.
    pub rule_counts: Vec<RuleTally>,
    /// Records that would be removed.
    pub total_matches: usize,
    /// Files with at least one match.
    pub affected_files: usize,
    /// Combined size of those files.
    pub affected_size_bytes: u64,
    /// Threshold the scan used; [`apply`] re-checks targets against it.
    #[serde(skip)]
    pub in_use_threshold: Duration,
}

impl Preview {
    /// Paths of files that would change.
    #[must_use]
    pub fn affected_paths(&self) -> Vec<PathBuf> {
        self.files
            .iter()
            .filter(|f| f.success && f.removed_count > 0)
            .map(|f| f.target.clone())
            .collect()
    }

    /// Whether there is nothing to remove.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.total_matches == 0
    }
}

/// Result of a mutating pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SanitizationReport {
    /// When the pass started.
    pub started_at: DateTime<Utc>,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
    /// Per-file results for the files that were processed.
    pub results: Vec<ProcessingResult>,
    /// Files skipped as in use at scan time or when the pass started.
    pub skipped_in_use: Vec<SkippedFile>,
    /// Files changed.
    pub files_modified: usize,
    /// Files whose pass failed.
    pub files_failed: usize,
    /// Records removed across all files.
    pub records_removed: usize,
    /// The backup taken before mutating, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup: Option<Backup>,
}

/// Scan every capture file at or below `root`.
///
/// Files modified within `in_use` are skipped.
#[must_use]
pub fn preview(root: &Path, matchers: &PhyMatchers, in_use: Duration) -> Preview {
    let mut files = Vec::new();
    let mut skipped_in_use = Vec::new();
    let mut affected_size_bytes = 0;

    for file in find_capture_files(root) {
        if fsutil::is_in_use(&file.path, in_use) {
            skipped_in_use.push(SkippedFile::new(file.path));
            continue;
        }
        let result = process_file(&file.path, file.kind, matchers, Mode::Scan);
        if result.removed_count > 0 {
            affected_size_bytes += file.size_bytes;
        }
        files.push(result);
    }

    let mut tallies: HashMap<(String, MatchType), usize> = HashMap::new();
    for m in files.iter().flat_map(|f| &f.matches) {
        *tallies
            .entry((m.matched_rule.clone(), m.match_type))
            .or_default() += 1;
    }
    let mut rule_counts: Vec<RuleTally> = tallies
        .into_iter()
        .map(|((rule, match_type), count)| RuleTally {
            rule,
            match_type,
            count,
        })
        .collect();
    rule_counts.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.rule.cmp(&b.rule)));

    Preview {
        total_matches: files.iter().map(|f| f.removed_count).sum(),
        affected_files: files.iter().filter(|f| f.removed_count > 0).count(),
        files,
        skipped_in_use,
        rule_counts,
        affected_size_bytes,
        in_use_threshold: in_use,
    }
}

/// Remove what `preview` found.
///
/// Only files with matches are touched. A file written to since the scan
/// is skipped as in use. When `backups` is given, the remaining files are
/// copied and verified first, and a backup failure aborts the pass before
/// anything is modified. Per-file failures are reported in the returned
/// results.
///
/// # Errors
///
/// Returns an error only if the backup fails.
pub fn apply(
    preview: &Preview,
    matchers: &PhyMatchers,
    backups: Option<&BackupManager>,
) -> Result<SanitizationReport> {
    let started_at = Utc::now();
    let clock = Instant::now();
    let mut skipped_in_use = preview.skipped_in_use.clone();
    let mut targets: Vec<&ProcessingResult> = Vec::new();
    for scanned in preview.files.iter().filter(|f| f.success && f.removed_count > 0) {
        if fsutil::is_in_use(&scanned.target, preview.in_use_threshold) {
            skipped_in_use.push(SkippedFile::new(scanned.target.clone()));
        } else {
            targets.push(scanned);
        }
    }

    let backup = match backups {
        Some(manager) if !targets.is_empty() => {
            let paths: Vec<PathBuf> = targets.iter().map(|t| t.target.clone()).collect();
            Some(manager.create_backup(&paths)?)
        }
        _ => None,
    };

    let results: Vec<ProcessingResult> = targets
        .iter()
        .map(|scanned| process_file(&scanned.target, scanned.kind, matchers, Mode::Apply))
        .collect();

    let report = SanitizationReport {
        started_at,
        duration_ms: u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX),
        files_modified: results.iter().filter(|r| r.success && r.removed_count > 0).count(),
        files_failed: results.iter().filter(|r| !r.success).count(),
        records_removed: results.iter().map(|r| r.removed_count).sum(),
        skipped_in_use,
        results,
        backup,
    };
    info!(
        files = report.files_modified,
        failed = report.files_failed,
        removed = report.records_removed,
        "Sanitization complete"
    );
    Ok(report)
}

/// Human-readable byte count with one decimal.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{size:.1} {}", UNITS[unit])
}

/// Plain-text rendering of a preview, shared by the CLI and the
/// interactive workflow.
#[must_use]
pub fn render_preview(preview: &Preview) -> String {
    use std::fmt::Write;

    let mut out = String::new();
    let _ = writeln!(out, "Files scanned:   {}", preview.files.len());
    for skipped in &preview.skipped_in_use {
        let _ = writeln!(
            out,
            "  skipped (in use, modified {}s ago): {}",
            skipped.age_secs,
            skipped.path.display()
        );
    }
    for file in &preview.files {
        if let Some(err) = &file.error {
            let _ = writeln!(out, "  failed: {} ({err})", file.target.display());
        } else if file.removed_count > 0 {
            let _ = writeln!(
                out,
                "  {}: {} of {} records match",
                file.target.display(),
                file.removed_count,
                file.original_count
            );
        }
    }
    if preview.is_clean() {
        let _ = writeln!(out, "No records match the dynamic exclusions.");
        return out;
    }
    let _ = writeln!(out, "Matches by rule:");
    for tally in &preview.rule_counts {
        let _ = writeln!(
            out,
            "  {:<32} {:>7} {:>6}",
            tally.rule,
            tally.match_type.to_string(),
            tally.count
        );
    }
    let _ = writeln!(
        out,
        "Total: {} records in {} files ({})",
        preview.total_matches,
        preview.affected_files,
        format_size(preview.affected_size_bytes)
    );
    out
}

#[cfg(test)]
mod tests {
    use std::fs;

    use filetime::FileTime;

    use super::*;
    use crate::rules::{FilterRule, Phy, PhyRules};
    use crate::testutil::KismetFixture;

    fn matchers(values: &[&str]) -> PhyMatchers {
        let mut rules = PhyRules::default();
        for value in values {
            rules.get_mut(Phy::Wifi).push(FilterRule::new(
                *value,
                MatchType::Pattern,
                "test",
                Phy::Wifi,
            ));
        }
        PhyMatchers::new(&rules)
    }

    fn age(path: &Path) {
        filetime::set_file_mtime(path, FileTime::from_unix_time(1_600_000_000, 0)).unwrap();
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0.0 B");
        assert_eq!(format_size(1023), "1023.0 B");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MB");
        assert_eq!(format_size(3 * 1024 * 1024 * 1024), "3.0 GB");
        assert_eq!(format_size(2048 * 1024 * 1024 * 1024 * 1024), "2048.0 TB");
    }

    #[test]
    fn test_preview_counts_rules_and_skips_in_use() {
        let fx = KismetFixture::new();
        fx.add_wifi("AA:00:00:00:00:01", "iPhone A", 1.0, 1.0);
        fx.add_wifi("AA:00:00:00:00:02", "iPhone B", 1.0, 1.0);
        fx.add_wifi("AA:00:00:00:00:03", "Pixel", 1.0, 1.0);
        fx.add_wifi("AA:00:00:00:00:04", "Home", 1.0, 1.0);
        age(fx.path());
        let live = fx.dir().join("live.kismet");
        fs::write(&live, b"being written").unwrap();

        let preview = preview(fx.dir(), &matchers(&["iPhone*", "Pixel"]), Duration::from_secs(30));

        assert_eq!(preview.files.len(), 1);
        assert_eq!(preview.skipped_in_use.len(), 1);
        assert_eq!(preview.skipped_in_use[0].path, live);
        assert_eq!(preview.total_matches, 3);
        assert_eq!(preview.affected_files, 1);
        assert_eq!(preview.affected_size_bytes, fs::metadata(fx.path()).unwrap().len());
        assert_eq!(preview.rule_counts[0].rule, "iPhone*");
        assert_eq!(preview.rule_counts[0].count, 2);
        assert_eq!(preview.rule_counts[1].rule, "Pixel");
        assert_eq!(fx.count("devices"), 4);

        let text = render_preview(&preview);
        assert!(text.contains("iPhone*"));
        assert!(text.contains("Total: 3 records in 1 files"));
    }

    #[test]
    fn test_apply_backs_up_then_removes() {
        let fx = KismetFixture::new();
        fx.add_wifi("AA:00:00:00:00:01", "iPhone Hotspot 7F2", 1.0, 1.0);
        fx.add_wifi("AA:00:00:00:00:02", "Home", 1.0, 1.0);
        age(fx.path());
        let pristine = fs::read(fx.path()).unwrap();
        let backup_root = tempfile::tempdir().unwrap();
        let manager = BackupManager::new(backup_root.path());
        let m = matchers(&["iPhone*"]);

        let preview = preview(fx.dir(), &m, Duration::from_secs(30));
        let report = apply(&preview, &m, Some(&manager)).unwrap();

        assert_eq!(report.files_modified, 1);
        assert_eq!(report.files_failed, 0);
        assert_eq!(report.records_removed, 1);
        assert_eq!(fx.count("devices"), 1);

        let backup = report.backup.unwrap();
        assert_eq!(backup.files.len(), 1);
        assert_eq!(fs::read(&backup.files[0].copy).unwrap(), pristine);

        let again = super::preview(fx.dir(), &m, Duration::from_secs(30));
        assert!(again.is_clean());
        assert!(render_preview(&again).contains("No records match"));
    }

    #[test]
    fn test_apply_skips_file_written_after_scan() {
        let fx = KismetFixture::new();
        fx.add_wifi("AA:00:00:00:00:01", "iPhone Hotspot 7F2", 1.0, 1.0);
        age(fx.path());
        let backup_root = tempfile::tempdir().unwrap();
        let manager = BackupManager::new(backup_root.path());
        let m = matchers(&["iPhone*"]);

        let preview = preview(fx.dir(), &m, Duration::from_secs(30));
        assert_eq!(preview.total_matches, 1);
        filetime::set_file_mtime(fx.path(), FileTime::now()).unwrap();
        let report = apply(&preview, &m, Some(&manager)).unwrap();

        assert!(report.results.is_empty());
        assert_eq!(report.records_removed, 0);
        assert_eq!(report.skipped_in_use.len(), 1);
        assert_eq!(report.skipped_in_use[0].path, fx.path().to_path_buf());
        assert!(report.backup.is_none());
        assert!(manager.list_backups().unwrap().is_empty());
        assert_eq!(fx.count("devices"), 1);
    }

    #[test]
    fn test_apply_with_nothing_to_do_makes_no_backup() {
        let fx = KismetFixture::new();
        fx.add_wifi("AA:00:00:00:00:02", "Home", 1.0, 1.0);
        age(fx.path());
        let backup_root = tempfile::tempdir().unwrap();
        let manager = BackupManager::new(backup_root.path());
        let m = matchers(&["iPhone*"]);

        let report = apply(&preview(fx.dir(), &m, Duration::from_secs(30)), &m, Some(&manager)).unwrap();
        assert!(report.backup.is_none());
        assert!(report.results.is_empty());
        assert!(manager.list_backups().unwrap().is_empty());
    }

    #[test]
    fn test_failed_file_does_not_stop_batch() {
        let fx = KismetFixture::new();
        fx.add_wifi("AA:00:00:00:00:01", "iPhone", 1.0, 1.0);
        age(fx.path());
        let bad = fx.dir().join("broken.kismet");
        fs::write(&bad, b"not a database").unwrap();
        age(&bad);

        let preview = preview(fx.dir(), &matchers(&["iPhone*"]), Duration::from_secs(30));
        assert_eq!(preview.files.len(), 2);
        assert_eq!(preview.files.iter().filter(|f| !f.success).count(), 1);
        assert_eq!(preview.total_matches, 1);
        assert_eq!(preview.affected_paths(), vec![fx.path().to_path_buf()]);
    }
}
