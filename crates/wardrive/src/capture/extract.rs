//! Per-family extraction with position fallback.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use super::{DeviceAttributes, DeviceRecord, ProtocolFamily};
use crate::error::Result;
use crate::kismetdb::{DeviceRow, GeoFix, KismetDb};
use crate::rules::Phy;

/// Where a device's position came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSource {
    /// The averaged position in `devices`.
    Device,
    /// The strongest positioned packet in `packets`.
    Packets,
    /// The latest positioned record in `data`.
    Data,
}

/// Resolve a device's position: averaged device position, then the
/// strongest positioned packet, then the generic `data` table.
///
/// # Errors
///
/// Returns an error if a fallback query fails.
pub fn resolve_position(db: &KismetDb, row: &DeviceRow) -> Result<Option<(GeoFix, PositionSource)>> {
    if row.has_position() {
        let fix = GeoFix {
            lat: row.avg_lat,
            lon: row.avg_lon,
            alt: 0.0,
            signal: None,
        };
        return Ok(Some((fix, PositionSource::Device)));
    }
    if row.devmac.is_empty() {
        return Ok(None);
    }
    if let Some(fix) = db.best_packet_fix(&row.devmac)? {
        return Ok(Some((fix, PositionSource::Packets)));
    }
    if let Some(fix) = db.data_fix(&row.devmac)? {
        return Ok(Some((fix, PositionSource::Data)));
    }
    Ok(None)
}

fn first_seen(epoch: i64) -> DateTime<Utc> {
    if epoch > 0 {
        DateTime::from_timestamp(epoch, 0).unwrap_or_else(Utc::now)
    } else {
        Utc::now()
    }
}

/// Extract every positioned device of one family.
///
/// Devices without a resolvable position are dropped. Undecodable attribute
/// blobs produce records with default name, channel and signal.
///
/// # Errors
///
/// Returns an error if the `devices` table cannot be read.
pub fn extract(db: &KismetDb, phy: Phy) -> Result<Vec<DeviceRecord>> {
    let rows = db.devices(phy)?;
    let mut records = Vec::with_capacity(rows.len());
    let mut unpositioned = 0usize;

    for row in rows {
        let position = resolve_position(db, &row).unwrap_or_else(|e| {
            warn!(devmac = %row.devmac, error = %e, "Position lookup failed");
            None
        });
        let Some((fix, source)) = position else {
            unpositioned += 1;
            continue;
        };

        let attrs = DeviceAttributes::decode(phy, row.device_json.as_deref());
        let signal = match (source, fix.signal) {
            (PositionSource::Packets, Some(signal)) => signal,
            _ => attrs.signal(),
        };
        let altitude = if fix.alt == 0.0 { attrs.altitude() } else { fix.alt };

        records.push(DeviceRecord {
            address: row.devmac.to_ascii_uppercase(),
            name: attrs.name().to_string(),
            auth_mode: attrs.auth_mode().to_string(),
            first_seen: first_seen(row.first_time),
            channel: attrs.channel(),
            signal,
            latitude: fix.lat,
            longitude: fix.lon,
            altitude,
            accuracy: 0.0,
            family: ProtocolFamily::from(phy),
        });
    }

    debug!(
        path = %db.path().display(),
        phy = %phy,
        extracted = records.len(),
        unpositioned,
        "Extracted devices"
    );
    Ok(records)
}

/// Open `path` read-only and extract the requested families in order.
///
/// # Errors
///
/// Returns an error if the file is missing, cannot be opened, or has no
/// readable `devices` table.
pub fn extract_all(path: &Path, families: &[Phy]) -> Result<Vec<DeviceRecord>> {
    let db = KismetDb::open_read_only(path)?;
    let mut records = Vec::new();
    for &phy in families {
        records.extend(extract(&db, phy)?);
    }
    Ok(records)
}
