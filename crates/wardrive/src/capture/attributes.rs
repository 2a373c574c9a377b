//! Decoding of the per-device attribute blob.
//!
//! Every decoder is total: missing keys, wrong types and unparseable JSON
//! all produce default values rather than errors.

use serde_json::Value;
use tracing::trace;

use crate::rules::Phy;

/// Signal reported when none is recorded.
pub const UNKNOWN_SIGNAL: i32 = -100;

const BASE_COMMON_NAME: &str = "kismet.device.base.commonname";
const BASE_NAME: &str = "kismet.device.base.name";
const BASE_CHANNEL: &str = "kismet.device.base.channel";
const BASE_FREQUENCY: &str = "kismet.device.base.frequency";
const BASE_SIGNAL: &str = "kismet.device.base.signal";
const LAST_SIGNAL: &str = "kismet.common.signal.last_signal";
const BASE_LOCATION: &str = "kismet.device.base.location";
const AVG_LOCATION: &str = "kismet.common.location.avg_loc";
const LOCATION_ALT: &str = "kismet.common.location.alt";

const DOT11_DEVICE: &str = "dot11.device";
const ADVERTISED_SSID_MAP: &str = "dot11.device.advertised_ssid_map";
const LAST_BEACONED_SSID: &str = "dot11.device.last_beaconed_ssid_record";
const PROBED_SSID_MAP: &str = "dot11.device.probed_ssid_map";
const ADVERTISED_SSID: &str = "dot11.advertisedssid.ssid";
const ADVERTISED_CRYPT: &str = "dot11.advertisedssid.crypt_set";
const PROBED_SSID: &str = "dot11.probedssid.ssid";

const BTLE_DEVICE: &str = "btle.device";
const BTLE_COMMON_NAME: &str = "btle.device.common_name";
const BTLE_ADVERTISED_NAME: &str = "btle.device.advertised_name";

const BT_DEVICE: &str = "bluetooth.device";
const BT_NAME: &str = "bluetooth.device.name";

static NULL: Value = Value::Null;

fn str_at<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(Value::as_str).unwrap_or_default()
}

/// Integer at `key`, accepting numbers and numeric strings.
fn int_at(value: &Value, key: &str) -> Option<i64> {
    match value.get(key)? {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_u64().and_then(|u| i64::try_from(u).ok()))
            .or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(|f| f as i64))
        }
        _ => None,
    }
}

fn float_at(value: &Value, key: &str) -> Option<f64> {
    match value.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Entries of a map that may be stored as an object or as an array.
fn entries(map: Option<&Value>) -> Vec<&Value> {
    match map {
        Some(Value::Object(obj)) => obj.values().collect(),
        Some(Value::Array(items)) => items.iter().collect(),
        _ => Vec::new(),
    }
}

fn last_signal(root: &Value) -> i32 {
    root.get(BASE_SIGNAL)
        .and_then(|s| int_at(s, LAST_SIGNAL))
        .and_then(|s| i32::try_from(s).ok())
        .unwrap_or(UNKNOWN_SIGNAL)
}

fn altitude(root: &Value) -> f64 {
    root.get(BASE_LOCATION)
        .and_then(|loc| loc.get(AVG_LOCATION))
        .and_then(|avg| float_at(avg, LOCATION_ALT))
        .unwrap_or_default()
}

/// First non-empty string among `candidates`.
fn first_non_empty<'a>(candidates: &[&'a str]) -> &'a str {
    candidates
        .iter()
        .copied()
        .find(|s| !s.is_empty())
        .unwrap_or_default()
}

/// Channel number for a frequency in MHz or kHz.
///
/// Values above 10000 are taken as kHz. Frequencies outside the 2.4 and
/// 5 GHz channel plans map to 0.
#[must_use]
pub fn freq_to_channel(freq: f64) -> i32 {
    if !freq.is_finite() || freq <= 0.0 {
        return 0;
    }
    let mhz = if freq > 10_000.0 { freq / 1000.0 } else { freq };
    let mhz = mhz.floor() as i64;
    let channel = match mhz {
        2484 => 14,
        2412..=2483 => (mhz - 2412) / 5 + 1,
        5170..=5825 => (mhz - 5000) / 5,
        _ => 0,
    };
    i32::try_from(channel).unwrap_or_default()
}

/// Security mode for a crypt bitmask. The newest standard present wins.
#[must_use]
pub fn crypt_to_auth_mode(crypt: u64) -> &'static str {
    const WPA3: u64 = 0x0080_0000;
    const WPA2: u64 = 0x0400;
    const WPA: u64 = 0x0200;
    const WEP: u64 = 0x0100;

    if crypt & WPA3 != 0 {
        "WPA3"
    } else if crypt & WPA2 != 0 {
        "WPA2"
    } else if crypt & WPA != 0 {
        "WPA"
    } else if crypt & WEP != 0 {
        "WEP"
    } else {
        "OPEN"
    }
}

/// Decoded attributes of a WiFi device.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WifiAttributes {
    /// Non-empty advertised SSIDs, in map order.
    pub advertised_ssids: Vec<String>,
    /// SSID of the last beacon, if any.
    pub beaconed_ssid: Option<String>,
    /// Non-empty probed SSIDs, in map order.
    pub probed_ssids: Vec<String>,
    /// Generic display name.
    pub common_name: String,
    /// Explicit base name.
    pub base_name: String,
    /// Channel, direct or derived from frequency.
    pub channel: i32,
    /// Last signal in dBm.
    pub signal: i32,
    /// Crypt bitmask of the first advertised SSID; `None` without one.
    pub crypt: Option<u64>,
    /// Averaged altitude, 0 if unknown.
    pub altitude: f64,
}

impl WifiAttributes {
    /// Decode from a parsed blob.
    #[must_use]
    pub fn decode(root: &Value) -> Self {
        let dot11 = root.get(DOT11_DEVICE).unwrap_or(&NULL);
        let advertised = entries(dot11.get(ADVERTISED_SSID_MAP));

        let advertised_ssids = advertised
            .iter()
            .map(|entry| str_at(entry, ADVERTISED_SSID))
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        let beaconed_ssid = match dot11.get(LAST_BEACONED_SSID) {
            Some(Value::String(s)) => Some(s.clone()),
            Some(record) => Some(str_at(record, ADVERTISED_SSID).to_string()),
            None => None,
        }
        .filter(|s| !s.is_empty());

        let probed_ssids = entries(dot11.get(PROBED_SSID_MAP))
            .iter()
            .map(|entry| str_at(entry, PROBED_SSID))
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        let channel = int_at(root, BASE_CHANNEL)
            .and_then(|c| i32::try_from(c).ok())
            .filter(|c| *c != 0)
            .unwrap_or_else(|| freq_to_channel(float_at(root, BASE_FREQUENCY).unwrap_or_default()));

        let crypt = advertised.first().map(|entry| {
            int_at(entry, ADVERTISED_CRYPT)
                .and_then(|c| u64::try_from(c).ok())
                .unwrap_or_default()
        });

        Self {
            advertised_ssids,
            beaconed_ssid,
            probed_ssids,
            common_name: str_at(root, BASE_COMMON_NAME).to_string(),
            base_name: str_at(root, BASE_NAME).to_string(),
            channel,
            signal: last_signal(root),
            crypt,
            altitude: altitude(root),
        }
    }

    /// Network name: first advertised SSID, else the common name, else the
    /// base name.
    #[must_use]
    pub fn name(&self) -> &str {
        first_non_empty(&[
            self.advertised_ssids.first().map_or("", String::as_str),
            &self.common_name,
            &self.base_name,
        ])
    }

    /// Names tested by the remover: advertised, last beaconed, then probed
    /// SSIDs, without duplicates.
    #[must_use]
    pub fn candidate_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        let all = self
            .advertised_ssids
            .iter()
            .chain(self.beaconed_ssid.iter())
            .chain(self.probed_ssids.iter());
        for name in all {
            if !names.contains(&name.as_str()) {
                names.push(name);
            }
        }
        names
    }

    /// Security mode string, empty for a device that advertises no
    /// network.
    #[must_use]
    pub fn auth_mode(&self) -> &'static str {
        self.crypt.map_or("", crypt_to_auth_mode)
    }
}

/// Decoded attributes of a BLE device.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BleAttributes {
    /// Resolved device name.
    pub name: String,
    /// Last signal in dBm.
    pub signal: i32,
    /// Averaged altitude, 0 if unknown.
    pub altitude: f64,
}

impl BleAttributes {
    /// Decode from a parsed blob.
    #[must_use]
    pub fn decode(root: &Value) -> Self {
        let btle = root.get(BTLE_DEVICE).unwrap_or(&NULL);
        let name = first_non_empty(&[
            str_at(btle, BTLE_COMMON_NAME),
            str_at(btle, BTLE_ADVERTISED_NAME),
            str_at(root, BASE_COMMON_NAME),
            str_at(root, BASE_NAME),
        ]);
        Self {
            name: name.to_string(),
            signal: last_signal(root),
            altitude: altitude(root),
        }
    }
}

/// Decoded attributes of a classic Bluetooth device.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BtAttributes {
    /// Resolved device name.
    pub name: String,
    /// Last signal in dBm.
    pub signal: i32,
    /// Averaged altitude, 0 if unknown.
    pub altitude: f64,
}

impl BtAttributes {
    /// Decode from a parsed blob.
    #[must_use]
    pub fn decode(root: &Value) -> Self {
        let bt = root.get(BT_DEVICE).unwrap_or(&NULL);
        let name = first_non_empty(&[
            str_at(bt, BT_NAME),
            str_at(root, BASE_COMMON_NAME),
            str_at(root, BASE_NAME),
        ]);
        Self {
            name: name.to_string(),
            signal: last_signal(root),
            altitude: altitude(root),
        }
    }
}

/// Attributes of one device, by family.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceAttributes {
    /// WiFi device.
    Wifi(WifiAttributes),
    /// BLE device.
    Ble(BleAttributes),
    /// Classic Bluetooth device.
    Bt(BtAttributes),
}

impl DeviceAttributes {
    /// Decode a raw blob for `phy`. Absent or malformed JSON yields defaults.
    #[must_use]
    pub fn decode(phy: Phy, blob: Option<&str>) -> Self {
        let root = match blob.map(serde_json::from_str::<Value>) {
            Some(Ok(value)) => value,
            Some(Err(e)) => {
                trace!(error = %e, "Undecodable device blob");
                Value::Null
            }
            None => Value::Null,
        };
        match phy {
            Phy::Wifi => Self::Wifi(WifiAttributes::decode(&root)),
            Phy::Btle => Self::Ble(BleAttributes::decode(&root)),
            Phy::Bt => Self::Bt(BtAttributes::decode(&root)),
        }
    }

    /// Display name of the device.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Wifi(a) => a.name(),
            Self::Ble(a) => &a.name,
            Self::Bt(a) => &a.name,
        }
    }

    /// Names the remover tests against rules.
    #[must_use]
    pub fn candidate_names(&self) -> Vec<&str> {
        match self {
            Self::Wifi(a) => a.candidate_names(),
            Self::Ble(BleAttributes { name, .. }) | Self::Bt(BtAttributes { name, .. }) => {
                if name.is_empty() {
                    Vec::new()
                } else {
                    vec![name.as_str()]
                }
            }
        }
    }

    /// Channel, 0 for the Bluetooth families.
    #[must_use]
    pub fn channel(&self) -> i32 {
        match self {
            Self::Wifi(a) => a.channel,
            Self::Ble(_) | Self::Bt(_) => 0,
        }
    }

    /// Last signal in dBm.
    #[must_use]
    pub fn signal(&self) -> i32 {
        match self {
            Self::Wifi(a) => a.signal,
            Self::Ble(a) => a.signal,
            Self::Bt(a) => a.signal,
        }
    }

    /// Averaged altitude in meters.
    #[must_use]
    pub fn altitude(&self) -> f64 {
        match self {
            Self::Wifi(a) => a.altitude,
            Self::Ble(a) => a.altitude,
            Self::Bt(a) => a.altitude,
        }
    }

    /// Security mode for WiFi, a fixed family label otherwise.
    #[must_use]
    pub fn auth_mode(&self) -> &'static str {
        match self {
            Self::Wifi(a) => a.auth_mode(),
            Self::Ble(_) => "BLE",
            Self::Bt(_) => "BT",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{bt_json, btle_json, wifi_json};
    use serde_json::json;

    #[test]
    fn test_freq_to_channel() {
        assert_eq!(freq_to_channel(2412.0), 1);
        assert_eq!(freq_to_channel(2437.0), 6);
        assert_eq!(freq_to_channel(2_462_000.0), 11);
        assert_eq!(freq_to_channel(2484.0), 14);
        assert_eq!(freq_to_channel(5180.0), 36);
        assert_eq!(freq_to_channel(5_745_000.0), 149);
        assert_eq!(freq_to_channel(900.0), 0);
        assert_eq!(freq_to_channel(0.0), 0);
        assert_eq!(freq_to_channel(f64::NAN), 0);
    }

    #[test]
    fn test_crypt_to_auth_mode() {
        assert_eq!(crypt_to_auth_mode(0), "OPEN");
        assert_eq!(crypt_to_auth_mode(0x100), "WEP");
        assert_eq!(crypt_to_auth_mode(0x200), "WPA");
        assert_eq!(crypt_to_auth_mode(0x400 | 0x200), "WPA2");
        assert_eq!(crypt_to_auth_mode(0x0080_0000 | 0x400), "WPA3");
        assert_eq!(crypt_to_auth_mode(0x2), "OPEN");
    }

    #[test]
    fn test_wifi_decode_fixture() {
        let attrs = WifiAttributes::decode(&wifi_json("HomeNet", 6, -42, 0x400));
        assert_eq!(attrs.name(), "HomeNet");
        assert_eq!(attrs.channel, 6);
        assert_eq!(attrs.signal, -42);
        assert_eq!(attrs.auth_mode(), "WPA2");
    }

    #[test]
    fn test_wifi_advertised_map_as_object() {
        let blob = json!({
            "dot11.device": {
                "dot11.device.advertised_ssid_map": {
                    "12345": {"dot11.advertisedssid.ssid": "Cafe", "dot11.advertisedssid.crypt_set": 256}
                }
            }
        });
        let attrs = WifiAttributes::decode(&blob);
        assert_eq!(attrs.name(), "Cafe");
        assert_eq!(attrs.auth_mode(), "WEP");
    }

    #[test]
    fn test_wifi_name_fallbacks() {
        let attrs = WifiAttributes::decode(&json!({"kismet.device.base.commonname": "Common"}));
        assert_eq!(attrs.name(), "Common");

        let attrs = WifiAttributes::decode(&json!({
            "kismet.device.base.commonname": "",
            "kismet.device.base.name": "Base"
        }));
        assert_eq!(attrs.name(), "Base");
    }

    #[test]
    fn test_wifi_auth_mode_needs_advertised_network() {
        let attrs = WifiAttributes::decode(&json!({"kismet.device.base.commonname": "Client"}));
        assert_eq!(attrs.crypt, None);
        assert_eq!(attrs.auth_mode(), "");

        let attrs = WifiAttributes::decode(&json!({
            "dot11.device": {
                "dot11.device.advertised_ssid_map": [{"dot11.advertisedssid.ssid": "Open"}]
            }
        }));
        assert_eq!(attrs.auth_mode(), "OPEN");
    }

    #[test]
    fn test_wifi_channel_from_frequency() {
        let attrs = WifiAttributes::decode(&json!({
            "kismet.device.base.channel": "",
            "kismet.device.base.frequency": 5_180_000
        }));
        assert_eq!(attrs.channel, 36);
    }

    #[test]
    fn test_wifi_candidate_names() {
        let blob = json!({
            "dot11.device": {
                "dot11.device.advertised_ssid_map": [
                    {"dot11.advertisedssid.ssid": "Primary"},
                    {"dot11.advertisedssid.ssid": ""}
                ],
                "dot11.device.last_beaconed_ssid_record": {"dot11.advertisedssid.ssid": "Primary"},
                "dot11.device.probed_ssid_map": [
                    {"dot11.probedssid.ssid": "PoppaShell"},
                    {"dot11.probedssid.ssid": "Primary"}
                ]
            }
        });
        let attrs = WifiAttributes::decode(&blob);
        assert_eq!(attrs.candidate_names(), vec!["Primary", "PoppaShell"]);
    }

    #[test]
    fn test_malformed_blob_yields_defaults() {
        let attrs = DeviceAttributes::decode(Phy::Wifi, Some("{not json"));
        assert_eq!(attrs.name(), "");
        assert_eq!(attrs.channel(), 0);
        assert_eq!(attrs.signal(), UNKNOWN_SIGNAL);
        assert_eq!(attrs.auth_mode(), "");
        assert!(attrs.candidate_names().is_empty());

        let attrs = DeviceAttributes::decode(Phy::Btle, None);
        assert_eq!(attrs.name(), "");
        assert_eq!(attrs.auth_mode(), "BLE");
    }

    #[test]
    fn test_wrong_types_yield_defaults() {
        let blob = json!({
            "kismet.device.base.signal": "strong",
            "kismet.device.base.channel": {"nested": true},
            "dot11.device": "unexpected"
        });
        let attrs = WifiAttributes::decode(&blob);
        assert_eq!(attrs.signal, UNKNOWN_SIGNAL);
        assert_eq!(attrs.channel, 0);
        assert!(attrs.advertised_ssids.is_empty());
    }

    #[test]
    fn test_btle_and_bt_names() {
        let ble = DeviceAttributes::decode(Phy::Btle, Some(btle_json("Fitbit Charge", -70).to_string().as_str()));
        assert_eq!(ble.name(), "Fitbit Charge");
        assert_eq!(ble.signal(), -70);
        assert_eq!(ble.channel(), 0);
        assert_eq!(ble.candidate_names(), vec!["Fitbit Charge"]);

        let bt = DeviceAttributes::decode(Phy::Bt, Some(bt_json("CarPlay", -55).to_string().as_str()));
        assert_eq!(bt.name(), "CarPlay");
        assert_eq!(bt.auth_mode(), "BT");
    }

    #[test]
    fn test_altitude() {
        let blob = json!({
            "kismet.device.base.location": {
                "kismet.common.location.avg_loc": {"kismet.common.location.alt": 12.5}
            }
        });
        assert!((WifiAttributes::decode(&blob).altitude - 12.5).abs() < f64::EPSILON);
    }
}
