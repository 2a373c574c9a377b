//! One observation per device per second.
//!
//! WiGLE keeps a single observation for each (address, whole second) and
//! silently discards the rest, so the strongest one is chosen here instead.

use std::collections::HashMap;

use crate::capture::DeviceRecord;

/// Keep the strongest record for each (address, whole-second) pair.
///
/// Ties keep the earlier record. Output order follows the first
/// occurrence of each pair.
#[must_use]
pub fn limit(records: Vec<DeviceRecord>) -> Vec<DeviceRecord> {
    let mut slots: HashMap<(String, i64), usize> = HashMap::with_capacity(records.len());
    let mut kept: Vec<DeviceRecord> = Vec::with_capacity(records.len());

    for record in records {
        let key = (record.address.clone(), record.first_seen.timestamp());
        match slots.get(&key) {
            Some(&slot) => {
                if record.signal > kept[slot].signal {
                    kept[slot] = record;
                }
            }
            None => {
                slots.insert(key, kept.len());
                kept.push(record);
            }
        }
    }

    kept
}

/// Apply [`limit`] when `enabled`, returning the records and how many were
/// dropped.
#[must_use]
pub fn apply(records: Vec<DeviceRecord>, enabled: bool) -> (Vec<DeviceRecord>, usize) {
    if !enabled {
        return (records, 0);
    }
    let before = records.len();
    let kept = limit(records);
    let dropped = before - kept.len();
    (kept, dropped)
}
