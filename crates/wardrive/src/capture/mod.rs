//! Device records extracted from capture databases.
//!
//! The extractor turns one `devices` row into a [`DeviceRecord`] with a
//! resolved position, decoding the nested attribute blob per family.

mod attributes;
mod extract;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::rules::Phy;

pub use attributes::{
    crypt_to_auth_mode, freq_to_channel, BleAttributes, BtAttributes, DeviceAttributes,
    WifiAttributes, UNKNOWN_SIGNAL,
};
pub use extract::{extract, extract_all, resolve_position, PositionSource};

/// Protocol family tag used in export rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolFamily {
    /// IEEE 802.11.
    #[serde(rename = "WIFI")]
    Wifi,
    /// Bluetooth Low Energy.
    #[serde(rename = "BLE")]
    Ble,
    /// Classic Bluetooth.
    #[serde(rename = "BT")]
    Bt,
}

impl ProtocolFamily {
    /// Rule family for this tag.
    #[must_use]
    pub fn phy(self) -> Phy {
        match self {
            Self::Wifi => Phy::Wifi,
            Self::Ble => Phy::Btle,
            Self::Bt => Phy::Bt,
        }
    }
}

impl From<Phy> for ProtocolFamily {
    fn from(phy: Phy) -> Self {
        match phy {
            Phy::Wifi => Self::Wifi,
            Phy::Btle => Self::Ble,
            Phy::Bt => Self::Bt,
        }
    }
}

impl fmt::Display for ProtocolFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Wifi => write!(f, "WIFI"),
            Self::Ble => write!(f, "BLE"),
            Self::Bt => write!(f, "BT"),
        }
    }
}

impl FromStr for ProtocolFamily {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "WIFI" => Ok(Self::Wifi),
            "BLE" => Ok(Self::Ble),
            "BT" => Ok(Self::Bt),
            other => Err(Error::internal(format!("unknown protocol family '{other}'"))),
        }
    }
}

/// A device observation ready for export.
///
/// `latitude` and `longitude` are never both placeholder zeros: the
/// extractor drops devices without a position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// Uppercase colon-separated hardware address.
    pub address: String,
    /// Network or device name, possibly empty.
    pub name: String,
    /// Security mode for WiFi, family label otherwise.
    pub auth_mode: String,
    /// First-seen time (UTC).
    pub first_seen: DateTime<Utc>,
    /// Channel number, 0 when unknown or not applicable.
    pub channel: i32,
    /// Signal in dBm.
    pub signal: i32,
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Altitude in meters.
    pub altitude: f64,
    /// Position accuracy in meters.
    pub accuracy: f64,
    /// Family tag.
    pub family: ProtocolFamily,
}
