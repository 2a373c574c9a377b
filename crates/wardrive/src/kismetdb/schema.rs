//! SQL used against capture databases.
//!
//! The capture tool owns the schema; these statements only read from it and
//! delete rows. The table layouts below describe the columns this crate
//! relies on and are used to build test fixtures.

/// Devices of one family, keyed by `rowid`.
pub const SELECT_DEVICES_BY_PHY: &str = r"
SELECT rowid, devmac, phyname, device, first_time, avg_lat, avg_lon
FROM devices
WHERE phyname = ?1
";

/// Number of devices across the families this crate handles.
pub const COUNT_DEVICES: &str = r"
SELECT COUNT(*) FROM devices
WHERE phyname IN ('IEEE802.11', 'BTLE', 'Bluetooth')
";

/// Positioned packet with the strongest signal sent by a device.
pub const SELECT_BEST_PACKET_FIX: &str = r"
SELECT lat, lon, alt, signal
FROM packets
WHERE sourcemac = ?1
  AND lat IS NOT NULL AND lon IS NOT NULL
  AND lat != 0 AND lon != 0
ORDER BY signal DESC
LIMIT 1
";

/// Most recent positioned data record for a device.
pub const SELECT_DATA_FIX: &str = r"
SELECT lat, lon, alt
FROM data
WHERE devmac = ?1
  AND lat IS NOT NULL AND lon IS NOT NULL
  AND lat != 0 AND lon != 0
ORDER BY rowid DESC
LIMIT 1
";

/// Delete one device row.
pub const DELETE_DEVICE: &str = "DELETE FROM devices WHERE rowid = ?1";

/// Delete every packet sent to or from an address.
pub const DELETE_PACKETS_FOR_MAC: &str =
    "DELETE FROM packets WHERE sourcemac = ?1 OR destmac = ?1";

/// Table existence probe.
pub const TABLE_EXISTS: &str =
    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1";

/// Columns of `datasources` that may hold the source's JSON record, in the
/// order they are tried.
pub const DATASOURCE_JSON_COLUMNS: &[&str] = &["json", "source_json"];

/// JSON path of a datasource's hardware address.
pub const DATASOURCE_MAC_PATH: &str = "$.\"kismet.datasource.source_mac\"";

/// `devices` as written by the capture tool.
pub const CREATE_DEVICES_TABLE: &str = r"
CREATE TABLE devices (
    first_time INT,
    last_time INT,
    devkey TEXT,
    phyname TEXT,
    devmac TEXT,
    strongest_signal INT,
    min_lat REAL,
    min_lon REAL,
    max_lat REAL,
    max_lon REAL,
    avg_lat REAL,
    avg_lon REAL,
    bytes_data INT,
    type TEXT,
    device BLOB,
    UNIQUE(phyname, devmac) ON CONFLICT REPLACE
)
";

/// `packets` as written by the capture tool.
pub const CREATE_PACKETS_TABLE: &str = r"
CREATE TABLE packets (
    ts_sec INT,
    ts_usec INT,
    phyname TEXT,
    sourcemac TEXT,
    destmac TEXT,
    transmac TEXT,
    frequency REAL,
    devkey TEXT,
    lat REAL,
    lon REAL,
    alt REAL,
    speed REAL,
    heading REAL,
    packet_len INT,
    signal INT,
    datasource TEXT,
    dlt INT,
    packet BLOB,
    error INT,
    tags TEXT
)
";

/// `data` as written by the capture tool.
pub const CREATE_DATA_TABLE: &str = r"
CREATE TABLE data (
    ts_sec INT,
    ts_usec INT,
    phyname TEXT,
    devmac TEXT,
    lat REAL,
    lon REAL,
    alt REAL,
    speed REAL,
    heading REAL,
    datasource TEXT,
    type TEXT,
    json BLOB
)
";

/// `datasources` as written by the capture tool.
pub const CREATE_DATASOURCES_TABLE: &str = r"
CREATE TABLE datasources (
    uuid TEXT,
    typestring TEXT,
    definition TEXT,
    name TEXT,
    interface TEXT,
    json BLOB,
    UNIQUE(uuid) ON CONFLICT REPLACE
)
";

/// Every capture table, in creation order.
pub const CAPTURE_TABLES: &[&str] = &[
    CREATE_DEVICES_TABLE,
    CREATE_PACKETS_TABLE,
    CREATE_DATA_TABLE,
    CREATE_DATASOURCES_TABLE,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_tables_create_cleanly() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        for stmt in CAPTURE_TABLES {
            conn.execute_batch(stmt).unwrap();
        }
        let count: i64 = conn
            .query_row(TABLE_EXISTS, ["datasources"], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_queries_prepare_against_capture_tables() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        for stmt in CAPTURE_TABLES {
            conn.execute_batch(stmt).unwrap();
        }
        for sql in [
            SELECT_DEVICES_BY_PHY,
            COUNT_DEVICES,
            SELECT_BEST_PACKET_FIX,
            SELECT_DATA_FIX,
            DELETE_DEVICE,
            DELETE_PACKETS_FOR_MAC,
        ] {
            conn.prepare(sql).unwrap();
        }
    }

    #[test]
    fn test_devices_table_has_required_columns() {
        for column in ["devmac", "phyname", "device BLOB", "first_time", "avg_lat", "avg_lon"] {
            assert!(CREATE_DEVICES_TABLE.contains(column), "missing {column}");
        }
    }
}
