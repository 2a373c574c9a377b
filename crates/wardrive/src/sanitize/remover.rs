//! Name-only removal of dynamically excluded devices.
//!
//! Addresses are read for reporting and never written anywhere: dynamic
//! rules exist for hardware that changes address every session.

use std::fs;
use std::path::Path;

use tracing::{debug, info, warn};

use super::{FileKind, Mode, ProcessingResult, RuleMatch};
use crate::capture::{DeviceAttributes, ProtocolFamily};
use crate::error::{Error, Result};
use crate::export::wigle::{split_fields, split_records, ADDRESS_COLUMN, NAME_COLUMN, TYPE_COLUMN};
use crate::fsutil::write_atomic;
use crate::kismetdb::{DeviceKey, KismetDb};
use crate::rules::{Phy, PhyMatchers};

/// Scan or clean one capture database.
///
/// Every family is checked against its own dynamic rules. In
/// [`Mode::Apply`] all deletions are committed in a single transaction;
/// any failure leaves the database untouched and is reported in the
/// result rather than returned.
#[must_use]
pub fn process_kismetdb(path: &Path, matchers: &PhyMatchers, mode: Mode) -> ProcessingResult {
    let mut result = ProcessingResult::new(path, FileKind::Kismet, mode);
    if let Err(e) = run_kismetdb(&mut result, path, matchers, mode) {
        warn!(path = %path.display(), error = %e, "Capture database pass failed");
        result.fail(&e);
    }
    result
}

fn run_kismetdb(
    result: &mut ProcessingResult,
    path: &Path,
    matchers: &PhyMatchers,
    mode: Mode,
) -> Result<()> {
    let mut db = match mode {
        Mode::Scan => KismetDb::open_read_only(path)?,
        Mode::Apply => KismetDb::open(path)?,
    };
    result.original_count = db.device_count()?;

    let mut doomed = Vec::new();
    for phy in Phy::ALL {
        let matcher = matchers.get(phy);
        if matcher.is_empty() {
            continue;
        }
        for row in db.devices(phy)? {
            let attrs = DeviceAttributes::decode(phy, row.device_json.as_deref());
            let Some((name, rule)) = matcher.find_any(attrs.candidate_names()) else {
                continue;
            };
            debug!(name = %name, devmac = %row.devmac, rule = %rule.value, "Device matched");
            result.matches.push(RuleMatch {
                name: name.to_string(),
                address: row.devmac.to_ascii_uppercase(),
                matched_rule: rule.value.clone(),
                match_type: rule.match_type,
                family: ProtocolFamily::from(phy),
            });
            doomed.push(DeviceKey {
                rowid: row.rowid,
                devmac: row.devmac.clone(),
            });
        }
    }

    result.removed_count = doomed.len();
    if mode == Mode::Apply && !doomed.is_empty() {
        let stats = db.delete_devices(&doomed)?;
        result.removed_count = stats.devices;
        result.deleted = Some(stats);
        info!(
            path = %path.display(),
            devices = stats.devices,
            packets = stats.packets,
            "Removed dynamically excluded devices"
        );
    }
    Ok(())
}

/// Scan or clean one exported WiGLE CSV.
///
/// The two header lines are kept verbatim. Each row is checked against the
/// rules of the family named in its type column, WiFi when that column is
/// unrecognized. In [`Mode::Apply`] the file is rewritten only if a row was
/// removed.
#[must_use]
pub fn process_wigle_csv(path: &Path, matchers: &PhyMatchers, mode: Mode) -> ProcessingResult {
    let mut result = ProcessingResult::new(path, FileKind::WigleCsv, mode);
    if let Err(e) = run_wigle_csv(&mut result, path, matchers, mode) {
        warn!(path = %path.display(), error = %e, "CSV pass failed");
        result.fail(&e);
    }
    result
}

fn run_wigle_csv(
    result: &mut ProcessingResult,
    path: &Path,
    matchers: &PhyMatchers,
    mode: Mode,
) -> Result<()> {
    if !path.exists() {
        return Err(Error::InputNotFound {
            path: path.to_path_buf(),
        });
    }
    let text = fs::read_to_string(path)?;
    let records = split_records(&text);
    if records.len() < 2 {
        return Err(Error::internal(format!(
            "{} is missing the two WiGLE header lines",
            path.display()
        )));
    }

    let (headers, rows) = records.split_at(2);
    result.original_count = rows.len();

    let mut kept = Vec::with_capacity(rows.len());
    for &row in rows {
        let fields = split_fields(row);
        let name = fields.get(NAME_COLUMN).map_or("", String::as_str);
        let family = fields
            .get(TYPE_COLUMN)
            .and_then(|t| t.parse::<ProtocolFamily>().ok())
            .unwrap_or(ProtocolFamily::Wifi);

        let hit = if name.is_empty() {
            None
        } else {
            matchers.get(family.phy()).find(name)
        };
        match hit {
            Some(rule) => result.matches.push(RuleMatch {
                name: name.to_string(),
                address: fields
                    .get(ADDRESS_COLUMN)
                    .map(|a| a.to_ascii_uppercase())
                    .unwrap_or_default(),
                matched_rule: rule.value.clone(),
                match_type: rule.match_type,
                family,
            }),
            None => kept.push(row),
        }
    }

    result.removed_count = result.matches.len();
    if mode == Mode::Apply && result.removed_count > 0 {
        let mut out = String::with_capacity(text.len());
        for line in headers.iter().chain(kept.iter()) {
            out.push_str(line);
            out.push('\n');
        }
        write_atomic(path, out.as_bytes())?;
        info!(path = %path.display(), removed = result.removed_count, "Rewrote CSV");
    }
    Ok(())
}

/// Dispatch on the file's format.
#[must_use]
pub fn process_file(path: &Path, kind: FileKind, matchers: &PhyMatchers, mode: Mode) -> ProcessingResult {
    match kind {
        FileKind::Kismet => process_kismetdb(path, matchers, mode),
        FileKind::WigleCsv => process_wigle_csv(path, matchers, mode),
    }
}
