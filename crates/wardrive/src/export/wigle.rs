//! The WiGLE CSV dialect.
//!
//! Two header lines followed by one row per device. Fields are bare unless
//! they contain a comma, a double quote or a newline, in which case they are
//! quoted with internal quotes doubled.

use std::borrow::Cow;
use std::io::{self, Write};

use crate::capture::DeviceRecord;
use crate::config::ExportSettings;

/// Format tag at the start of the first header line.
pub const FORMAT_VERSION: &str = "WigleWifi-1.4";

/// The second header line.
pub const COLUMNS: &str = "MAC,SSID,AuthMode,FirstSeen,Channel,RSSI,CurrentLatitude,\
CurrentLongitude,AltitudeMeters,AccuracyMeters,Type";

/// Column index of the address.
pub const ADDRESS_COLUMN: usize = 0;
/// Column index of the network or device name.
pub const NAME_COLUMN: usize = 1;
/// Column index of the family tag.
pub const TYPE_COLUMN: usize = 10;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// The application identity line.
#[must_use]
pub fn identity_line(settings: &ExportSettings) -> String {
    format!(
        "{FORMAT_VERSION},appRelease={}-{},model={},release={},device={},display=,board=,brand={}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        settings.model,
        settings.release,
        settings.device,
        settings.brand,
    )
}

/// Both header lines, without trailing newlines.
#[must_use]
pub fn header_lines(settings: &ExportSettings) -> [String; 2] {
    [identity_line(settings), COLUMNS.to_string()]
}

/// Quote `value` if it needs quoting.
#[must_use]
pub fn escape_field(value: &str) -> Cow<'_, str> {
    if value.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", value.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(value)
    }
}

/// One data row, without a trailing newline.
#[must_use]
pub fn format_row(record: &DeviceRecord) -> String {
    format!(
        "{},{},{},{},{},{},{:.6},{:.6},{:.1},{:.1},{}",
        escape_field(&record.address),
        escape_field(&record.name),
        escape_field(&record.auth_mode),
        record.first_seen.format(TIMESTAMP_FORMAT),
        record.channel,
        record.signal,
        record.latitude,
        record.longitude,
        record.altitude,
        record.accuracy,
        record.family,
    )
}

/// Write a complete file: headers, then one row per record.
///
/// # Errors
///
/// Returns an error if the writer fails.
pub fn write_csv<W: Write>(
    mut out: W,
    records: &[DeviceRecord],
    settings: &ExportSettings,
) -> io::Result<()> {
    for line in header_lines(settings) {
        writeln!(out, "{line}")?;
    }
    for record in records {
        writeln!(out, "{}", format_row(record))?;
    }
    out.flush()
}

/// Render a complete file into a string.
#[must_use]
pub fn render(records: &[DeviceRecord], settings: &ExportSettings) -> String {
    let mut out = String::new();
    for line in header_lines(settings) {
        out.push_str(&line);
        out.push('\n');
    }
    for record in records {
        out.push_str(&format_row(record));
        out.push('\n');
    }
    out
}

/// Split text into logical records.
///
/// Newlines inside quoted fields belong to the record. A trailing `\r` is
/// stripped from each record and blank lines are dropped.
#[must_use]
pub fn split_records(text: &str) -> Vec<&str> {
    let mut records = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;

    for (i, ch) in text.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            '\n' if !in_quotes => {
                records.push(&text[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if start < text.len() {
        records.push(&text[start..]);
    }

    records
        .into_iter()
        .map(|r| r.strip_suffix('\r').unwrap_or(r))
        .filter(|r| !r.is_empty())
        .collect()
}

/// Split one record into unescaped fields.
#[must_use]
pub fn split_fields(record: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = record.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    field.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            }
            '"' if field.is_empty() => in_quotes = true,
            ',' if !in_quotes => fields.push(std::mem::take(&mut field)),
            _ => field.push(ch),
        }
    }
    fields.push(field);
    fields
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::capture::ProtocolFamily;

    fn record(name: &str) -> DeviceRecord {
        DeviceRecord {
            address: "AA:BB:CC:DD:EE:FF".to_string(),
            name: name.to_string(),
            auth_mode: "OPEN".to_string(),
            first_seen: Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 5).unwrap(),
            channel: 6,
            signal: -65,
            latitude: 47.6062,
            longitude: -122.3321,
            altitude: 0.0,
            accuracy: 0.0,
            family: ProtocolFamily::Wifi,
        }
    }

    #[test]
    fn test_header_lines() {
        let [identity, columns] = header_lines(&ExportSettings::default());
        assert!(identity.starts_with("WigleWifi-1.4,appRelease=wardrive-"));
        assert!(identity.contains(",model=RaspberryPi,release=bookworm,"));
        assert!(identity.ends_with(",display=,board=,brand=wardrive"));
        assert_eq!(split_fields(&columns).len(), 11);
        assert_eq!(split_fields(&columns)[NAME_COLUMN], "SSID");
        assert_eq!(split_fields(&columns)[TYPE_COLUMN], "Type");
    }

    #[test]
    fn test_format_row_precision() {
        assert_eq!(
            format_row(&record("CoffeeShop")),
            "AA:BB:CC:DD:EE:FF,CoffeeShop,OPEN,2024-03-01 12:30:05,6,-65,\
             47.606200,-122.332100,0.0,0.0,WIFI"
        );
    }

    #[test]
    fn test_escape_field() {
        assert_eq!(escape_field("plain"), "plain");
        assert_eq!(escape_field("a,b"), "\"a,b\"");
        assert_eq!(escape_field("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(escape_field("two\nlines"), "\"two\nlines\"");
        assert!(matches!(escape_field("plain"), Cow::Borrowed(_)));
    }

    #[test]
    fn test_comma_name_survives_reparse() {
        let row = format_row(&record("Guest, Network"));
        let fields = split_fields(&row);
        assert_eq!(fields.len(), 11);
        assert_eq!(fields[NAME_COLUMN], "Guest, Network");
    }

    #[test]
    fn test_render_matches_written_file() {
        let settings = ExportSettings::default();
        let records = [record("HomeNet"), record("Guest, Network")];
        let mut buf = Vec::new();
        write_csv(&mut buf, &records, &settings).unwrap();
        assert_eq!(render(&records, &settings).into_bytes(), buf);
    }

    #[test]
    fn test_quote_and_newline_names_survive_reparse() {
        let settings = ExportSettings::default();
        let text = render(&[record("say \"hi\""), record("two\nlines")], &settings);
        let records = split_records(&text);
        assert_eq!(records.len(), 4);
        assert_eq!(split_fields(records[2])[NAME_COLUMN], "say \"hi\"");
        assert_eq!(split_fields(records[3])[NAME_COLUMN], "two\nlines");
    }

    #[test]
    fn test_split_records_handles_crlf_and_blank_lines() {
        let records = split_records("a,b\r\n\r\nc,d\n");
        assert_eq!(records, vec!["a,b", "c,d"]);
    }

    #[test]
    fn test_split_fields_empty_values() {
        assert_eq!(split_fields("a,,c"), vec!["a", "", "c"]);
        assert_eq!(split_fields(""), vec![""]);
    }
}
