//! Capture-to-WiGLE export pipeline.
//!
//! Extraction runs per input file and per family. The collected records then
//! pass through the exclusion-zone filter, the dynamic name filter and the
//! rate limiter, in that order, before being written.

pub mod rate_limit;
pub mod wigle;
mod zone;

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::capture::{extract_all, DeviceRecord, ProtocolFamily};
use crate::config::ExportSettings;
use crate::error::{Error, Result};
use crate::fsutil::write_atomic;
use crate::rules::{Phy, PhyMatchers};

pub use zone::{in_any, ExclusionZone};

/// What to export and how to filter it.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportOptions {
    /// Capture databases, directories or glob patterns.
    pub inputs: Vec<PathBuf>,
    /// Families to extract, in output order.
    pub families: Vec<Phy>,
    /// Records inside any of these are dropped.
    pub zones: Vec<ExclusionZone>,
    /// Drop records whose name matches a dynamic exclusion.
    pub apply_name_exclusions: bool,
    /// Keep one record per device per second.
    pub rate_limit: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            inputs: Vec::new(),
            families: Phy::ALL.to_vec(),
            zones: Vec::new(),
            apply_name_exclusions: false,
            rate_limit: true,
        }
    }
}

/// Counts for one export run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExportStats {
    /// WiFi records extracted.
    pub wifi_count: usize,
    /// BLE records extracted.
    pub btle_count: usize,
    /// Classic Bluetooth records extracted.
    pub bt_count: usize,
    /// Records with a position, before filtering.
    pub total_with_gps: usize,
    /// Dropped by exclusion zones.
    pub zone_filtered: usize,
    /// Dropped by dynamic name exclusions.
    pub name_filtered: usize,
    /// `zone_filtered + name_filtered`.
    pub privacy_filtered: usize,
    /// Dropped by the rate limiter.
    pub rate_limited: usize,
    /// Input files read.
    pub files_processed: usize,
    /// Input files that could not be read.
    pub files_failed: usize,
    /// Records written.
    pub final_count: usize,
}

/// An input that could not be read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileFailure {
    /// The input file.
    pub path: PathBuf,
    /// Why it failed.
    pub error: String,
}

/// Result of an export run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportReport {
    /// Counts.
    pub stats: ExportStats,
    /// Records after filtering, in output order.
    #[serde(skip)]
    pub records: Vec<DeviceRecord>,
    /// Inputs that failed.
    pub failures: Vec<FileFailure>,
    /// Where the CSV was written, if anywhere.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
}

fn has_glob_chars(s: &str) -> bool {
    s.contains(['*', '?', '['])
}

fn is_capture(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("kismet"))
}

/// Resolve inputs into capture database paths.
///
/// Glob patterns are expanded and directories searched for `*.kismet`.
/// A file reached through more than one input is listed once, at its
/// first position.
///
/// # Errors
///
/// Returns [`Error::InputNotFound`] for a path that does not exist or a
/// pattern that matches nothing.
pub fn expand_inputs(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for input in inputs {
        let text = input.to_string_lossy();
        if has_glob_chars(&text) && !input.exists() {
            let matched: Vec<PathBuf> = glob::glob(&text)
                .map_err(|e| Error::internal(format!("bad input pattern {text}: {e}")))?
                .filter_map(std::result::Result::ok)
                .collect();
            if matched.is_empty() {
                return Err(Error::InputNotFound {
                    path: input.clone(),
                });
            }
            paths.extend(matched);
        } else if input.is_dir() {
            let mut found: Vec<PathBuf> = walkdir::WalkDir::new(input)
                .into_iter()
                .filter_map(std::result::Result::ok)
                .filter(|e| e.file_type().is_file() && is_capture(e.path()))
                .map(walkdir::DirEntry::into_path)
                .collect();
            found.sort();
            paths.extend(found);
        } else if input.exists() {
            paths.push(input.clone());
        } else {
            return Err(Error::InputNotFound {
                path: input.clone(),
            });
        }
    }
    let mut seen = HashSet::new();
    paths.retain(|p| seen.insert(p.clone()));
    Ok(paths)
}

/// Extract and filter without writing anything.
///
/// A file that cannot be read is counted in `files_failed` and the run
/// continues with the rest.
///
/// # Errors
///
/// Returns an error if an input does not exist.
pub fn collect(options: &ExportOptions, dynamic: &PhyMatchers) -> Result<ExportReport> {
    let paths = expand_inputs(&options.inputs)?;
    let mut stats = ExportStats::default();
    let mut failures = Vec::new();
    let mut records = Vec::new();

    for path in &paths {
        match extract_all(path, &options.families) {
            Ok(extracted) => {
                debug!(path = %path.display(), records = extracted.len(), "Read capture");
                stats.files_processed += 1;
                records.extend(extracted);
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping unreadable capture");
                stats.files_failed += 1;
                failures.push(FileFailure {
                    path: path.clone(),
                    error: e.to_string(),
                });
            }
        }
    }

    for record in &records {
        match record.family {
            ProtocolFamily::Wifi => stats.wifi_count += 1,
            ProtocolFamily::Ble => stats.btle_count += 1,
            ProtocolFamily::Bt => stats.bt_count += 1,
        }
    }
    stats.total_with_gps = records.len();

    if !options.zones.is_empty() {
        let before = records.len();
        records.retain(|r| !in_any(&options.zones, r.latitude, r.longitude));
        stats.zone_filtered = before - records.len();
    }

    if options.apply_name_exclusions {
        let before = records.len();
        records.retain(|r| r.name.is_empty() || dynamic.get(r.family.phy()).find(&r.name).is_none());
        stats.name_filtered = before - records.len();
    }
    stats.privacy_filtered = stats.zone_filtered + stats.name_filtered;

    let (records, rate_limited) = rate_limit::apply(records, options.rate_limit);
    stats.rate_limited = rate_limited;
    stats.final_count = records.len();

    Ok(ExportReport {
        stats,
        records,
        failures,
        output: None,
    })
}

/// Write `records` as a WiGLE CSV at `output`, replacing any existing file.
///
/// # Errors
///
/// Returns an error if the parent directory cannot be created or the file
/// cannot be written.
pub fn write_wigle_csv(output: &Path, records: &[DeviceRecord], settings: &ExportSettings) -> Result<()> {
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let mut buf = Vec::new();
    wigle::write_csv(&mut buf, records, settings)?;
    write_atomic(output, &buf)
}

/// Run the full export and write the CSV to `output`.
///
/// # Errors
///
/// Returns an error if an input does not exist or the output cannot be
/// written.
pub fn export_to_wigle(
    options: &ExportOptions,
    dynamic: &PhyMatchers,
    settings: &ExportSettings,
    output: &Path,
) -> Result<ExportReport> {
    let mut report = collect(options, dynamic)?;
    write_wigle_csv(output, &report.records, settings)?;
    info!(
        output = %output.display(),
        records = report.stats.final_count,
        privacy_filtered = report.stats.privacy_filtered,
        rate_limited = report.stats.rate_limited,
        "Export written"
    );
    report.output = Some(output.to_path_buf());
    Ok(report)
}
