//! Capture-database fixtures for tests.

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection};
use serde_json::{json, Value};
use tempfile::TempDir;

use crate::kismetdb::schema;

/// A capture database in a temporary directory.
pub(crate) struct KismetFixture {
    dir: TempDir,
    path: PathBuf,
    conn: Connection,
}

impl KismetFixture {
    /// A database with every capture table.
    pub(crate) fn new() -> Self {
        Self::with_tables(schema::CAPTURE_TABLES)
    }

    /// A database with only the `devices` table, like a trimmed capture.
    pub(crate) fn devices_only() -> Self {
        Self::with_tables(&[schema::CREATE_DEVICES_TABLE])
    }

    fn with_tables(tables: &[&str]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Kismet-20240101-00-00-00-1.kismet");
        let conn = Connection::open(&path).unwrap();
        for stmt in tables {
            conn.execute_batch(stmt).unwrap();
        }
        Self { dir, path, conn }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// Insert a device row and return its rowid.
    pub(crate) fn add_device(
        &self,
        mac: &str,
        phyname: &str,
        device: Option<&Value>,
        first_time: i64,
        avg_lat: f64,
        avg_lon: f64,
    ) -> i64 {
        let blob = device.map(|v| v.to_string().into_bytes());
        self.conn
            .execute(
                "INSERT INTO devices (first_time, last_time, devkey, phyname, devmac, \
                 avg_lat, avg_lon, device) VALUES (?1, ?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![first_time, format!("key-{mac}"), phyname, mac, avg_lat, avg_lon, blob],
            )
            .unwrap();
        self.conn.last_insert_rowid()
    }

    /// Insert a WiFi access point advertising `ssid`.
    pub(crate) fn add_wifi(&self, mac: &str, ssid: &str, avg_lat: f64, avg_lon: f64) -> i64 {
        self.add_device(
            mac,
            "IEEE802.11",
            Some(&wifi_json(ssid, 6, -65, 0)),
            1_700_000_000,
            avg_lat,
            avg_lon,
        )
    }

    pub(crate) fn add_packet(
        &self,
        source: &str,
        dest: &str,
        lat: f64,
        lon: f64,
        alt: f64,
        signal: i32,
    ) {
        self.conn
            .execute(
                "INSERT INTO packets (ts_sec, ts_usec, phyname, sourcemac, destmac, \
                 lat, lon, alt, signal) VALUES (1700000000, 0, 'IEEE802.11', ?1, ?2, ?3, ?4, ?5, ?6)",
                params![source, dest, lat, lon, alt, signal],
            )
            .unwrap();
    }

    pub(crate) fn add_data(&self, mac: &str, lat: f64, lon: f64, alt: f64) {
        self.conn
            .execute(
                "INSERT INTO data (ts_sec, ts_usec, phyname, devmac, lat, lon, alt) \
                 VALUES (1700000000, 0, 'BTLE', ?1, ?2, ?3, ?4)",
                params![mac, lat, lon, alt],
            )
            .unwrap();
    }

    pub(crate) fn add_datasource(&self, uuid: &str, json: &str) {
        self.conn
            .execute(
                "INSERT INTO datasources (uuid, json) VALUES (?1, ?2)",
                params![uuid, json],
            )
            .unwrap();
    }

    pub(crate) fn count(&self, table: &str) -> i64 {
        self.conn
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
            .unwrap()
    }
}

/// Attribute blob of a WiFi access point.
pub(crate) fn wifi_json(ssid: &str, channel: i32, signal: i32, crypt: u64) -> Value {
    json!({
        "kismet.device.base.commonname": ssid,
        "kismet.device.base.name": "",
        "kismet.device.base.channel": channel.to_string(),
        "kismet.device.base.frequency": 2_437_000,
        "kismet.device.base.signal": {
            "kismet.common.signal.last_signal": signal
        },
        "dot11.device": {
            "dot11.device.advertised_ssid_map": [
                {
                    "dot11.advertisedssid.ssid": ssid,
                    "dot11.advertisedssid.crypt_set": crypt
                }
            ]
        }
    })
}

/// Attribute blob of a BLE device.
pub(crate) fn btle_json(name: &str, signal: i32) -> Value {
    json!({
        "kismet.device.base.commonname": "",
        "kismet.device.base.signal": {
            "kismet.common.signal.last_signal": signal
        },
        "btle.device": {
            "btle.device.advertised_name": name
        }
    })
}

/// Attribute blob of a classic Bluetooth device.
pub(crate) fn bt_json(name: &str, signal: i32) -> Value {
    json!({
        "kismet.device.base.signal": {
            "kismet.common.signal.last_signal": signal
        },
        "bluetooth.device": {
            "bluetooth.device.name": name
        }
    })
}
