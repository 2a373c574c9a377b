//! Access to capture databases (`.kismet` files).
//!
//! A [`KismetDb`] wraps one `SQLite` connection for the duration of a single
//! pass over a single file. Reads never modify the file; deletions are
//! staged in one transaction and committed together.

pub mod schema;

use std::path::{Path, PathBuf};

use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags, OptionalExtension, Row};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::rules::Phy;

/// One row of the `devices` table.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceRow {
    /// `SQLite` rowid, the key used for deletion.
    pub rowid: i64,
    /// Hardware address as stored.
    pub devmac: String,
    /// Family tag, e.g. `IEEE802.11`.
    pub phyname: String,
    /// The nested attribute blob, if present and UTF-8.
    pub device_json: Option<String>,
    /// First-seen epoch seconds, 0 if unknown.
    pub first_time: i64,
    /// Averaged latitude, 0 if unknown.
    pub avg_lat: f64,
    /// Averaged longitude, 0 if unknown.
    pub avg_lon: f64,
}

impl DeviceRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let device_json = match row.get_ref(3)? {
            ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
                std::str::from_utf8(bytes).ok().map(str::to_string)
            }
            _ => None,
        };
        Ok(Self {
            rowid: row.get(0)?,
            devmac: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
            phyname: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
            device_json,
            first_time: row.get::<_, Option<i64>>(4)?.unwrap_or_default(),
            avg_lat: row.get::<_, Option<f64>>(5)?.unwrap_or_default(),
            avg_lon: row.get::<_, Option<f64>>(6)?.unwrap_or_default(),
        })
    }

    /// Whether the averaged position is usable.
    #[must_use]
    pub fn has_position(&self) -> bool {
        self.avg_lat != 0.0 && self.avg_lon != 0.0
    }
}

/// A position found for a device outside the `devices` table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoFix {
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lon: f64,
    /// Altitude in meters, 0 if unknown.
    pub alt: f64,
    /// Signal of the observation that supplied the fix, if recorded.
    pub signal: Option<i32>,
}

/// A device selected for deletion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceKey {
    /// `devices.rowid`.
    pub rowid: i64,
    /// `devices.devmac`, used to cascade into dependent tables.
    pub devmac: String,
}

/// Rows removed by [`KismetDb::delete_devices`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeleteStats {
    /// Rows removed from `devices`.
    pub devices: usize,
    /// Rows removed from `packets`.
    pub packets: usize,
    /// Rows removed from `datasources`.
    pub datasources: usize,
}

/// An open capture database.
#[derive(Debug)]
pub struct KismetDb {
    path: PathBuf,
    conn: Connection,
}

impl KismetDb {
    /// Open an existing capture database for reading only.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or cannot be opened.
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path.as_ref(), OpenFlags::SQLITE_OPEN_READ_ONLY)
    }

    /// Open an existing capture database for reading and deleting.
    ///
    /// Never creates a file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path.as_ref(), OpenFlags::SQLITE_OPEN_READ_WRITE)
    }

    fn open_with(path: &Path, flags: OpenFlags) -> Result<Self> {
        if !path.exists() {
            return Err(Error::InputNotFound {
                path: path.to_path_buf(),
            });
        }
        debug!("Opening capture database at {}", path.display());
        let conn = Connection::open_with_flags(path, flags | OpenFlags::SQLITE_OPEN_NO_MUTEX)
            .map_err(|source| Error::DatabaseOpen {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self {
            path: path.to_path_buf(),
            conn,
        })
    }

    /// Path of the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a table exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be queried.
    pub fn has_table(&self, table: &str) -> Result<bool> {
        let count: i64 = self
            .conn
            .query_row(schema::TABLE_EXISTS, [table], |row| row.get(0))?;
        Ok(count > 0)
    }

    /// Whether `table` has a column named `column`.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be queried.
    pub fn has_column(&self, table: &str, column: &str) -> Result<bool> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM pragma_table_info(?1)")?;
        let names = stmt
            .query_map([table], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(names.iter().any(|name| name == column))
    }

    /// All devices of one family.
    ///
    /// # Errors
    ///
    /// Returns an error if the `devices` table is missing or unreadable.
    pub fn devices(&self, phy: Phy) -> Result<Vec<DeviceRow>> {
        let mut stmt = self.conn.prepare(schema::SELECT_DEVICES_BY_PHY)?;
        let rows = stmt
            .query_map([phy.kismet_name()], DeviceRow::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        debug!(phy = %phy, count = rows.len(), "Read device rows");
        Ok(rows)
    }

    /// Number of devices of any handled family.
    ///
    /// # Errors
    ///
    /// Returns an error if the `devices` table is missing or unreadable.
    pub fn device_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row(schema::COUNT_DEVICES, [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    /// The positioned packet with the strongest signal sent by `devmac`.
    ///
    /// Returns `None` if the `packets` table is absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn best_packet_fix(&self, devmac: &str) -> Result<Option<GeoFix>> {
        if !self.has_table("packets")? {
            return Ok(None);
        }
        let fix = self
            .conn
            .query_row(schema::SELECT_BEST_PACKET_FIX, [devmac], |row| {
                Ok(GeoFix {
                    lat: row.get(0)?,
                    lon: row.get(1)?,
                    alt: row.get::<_, Option<f64>>(2)?.unwrap_or_default(),
                    signal: row.get::<_, Option<i32>>(3)?.filter(|s| *s != 0),
                })
            })
            .optional()?;
        Ok(fix)
    }

    /// The most recent positioned `data` record for `devmac`.
    ///
    /// Returns `None` if the `data` table is absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn data_fix(&self, devmac: &str) -> Result<Option<GeoFix>> {
        if !self.has_table("data")? {
            return Ok(None);
        }
        let fix = self
            .conn
            .query_row(schema::SELECT_DATA_FIX, [devmac], |row| {
                Ok(GeoFix {
                    lat: row.get(0)?,
                    lon: row.get(1)?,
                    alt: row.get::<_, Option<f64>>(2)?.unwrap_or_default(),
                    signal: None,
                })
            })
            .optional()?;
        Ok(fix)
    }

    /// The `datasources` column holding JSON, if the table has one.
    fn datasource_json_column(&self) -> Result<Option<&'static str>> {
        if !self.has_table("datasources")? {
            return Ok(None);
        }
        for &column in schema::DATASOURCE_JSON_COLUMNS {
            if self.has_column("datasources", column)? {
                return Ok(Some(column));
            }
        }
        Ok(None)
    }

    /// Delete devices and the rows that reference their addresses.
    ///
    /// All deletions happen in one transaction: either every row is removed
    /// or, on error, none is. The `datasources` cascade is best effort and
    /// its failures are logged without aborting.
    ///
    /// # Errors
    ///
    /// Returns an error if a `devices` or `packets` deletion or the commit
    /// fails. The database is left unchanged in that case.
    pub fn delete_devices(&mut self, targets: &[DeviceKey]) -> Result<DeleteStats> {
        let mut stats = DeleteStats::default();
        if targets.is_empty() {
            return Ok(stats);
        }

        let has_packets = self.has_table("packets")?;
        let datasource_column = self.datasource_json_column()?;
        let datasource_sql = datasource_column.map(|column| {
            format!(
                "DELETE FROM datasources WHERE json_valid(CAST({column} AS TEXT)) \
                 AND json_extract(CAST({column} AS TEXT), '{}') = ?1",
                schema::DATASOURCE_MAC_PATH
            )
        });

        let tx = self.conn.transaction()?;
        for target in targets {
            stats.devices += tx.execute(schema::DELETE_DEVICE, [target.rowid])?;
            if has_packets {
                stats.packets += tx.execute(schema::DELETE_PACKETS_FOR_MAC, [&target.devmac])?;
            }
            if let Some(sql) = &datasource_sql {
                match tx.execute(sql, [&target.devmac]) {
                    Ok(n) => stats.datasources += n,
                    Err(e) => warn!(
                        devmac = %target.devmac,
                        error = %e,
                        "Skipping datasource cleanup"
                    ),
                }
            }
        }
        tx.commit()?;

        info!(
            path = %self.path.display(),
            devices = stats.devices,
            packets = stats.packets,
            datasources = stats.datasources,
            "Deleted devices"
        );
        Ok(stats)
    }
}
