use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{Map, Value as JsonValue};
use std::io::Cursor;

use crate::error::{Error, Result};

/// Input format of EXIF date fields.
const EXIF_INPUT_FORMAT: &str = "%Y:%m:%d %H:%M:%S";

/// Canonical output form, e.g. `2023-08-14 10:00:00 +0000 UTC`.
const EXIF_OUTPUT_FORMAT: &str = "%Y-%m-%d %H:%M:%S %z UTC";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExifInfo {
    pub model: Option<String>,
    pub make: Option<String>,
    pub taken_time: Option<DateTime<Utc>>,
    pub original_time: Option<DateTime<Utc>>,
    pub x_dim: Option<u32>,
    pub y_dim: Option<u32>,
    pub orientation: Option<String>,
    pub gps_latitude: Option<f64>,
    pub gps_longitude: Option<f64>,
    pub gps_coords: Option<String>,
    /// Every primary-IFD field as `tag -> display value`.
    pub raw: Option<String>,
}

impl ExifInfo {
    pub fn is_empty(&self) -> bool {
        *self == ExifInfo::default()
    }
}

/// Strip surrounding quotes and angle brackets from camera strings.
fn clean_camera_string(value: &str) -> Option<String> {
    let cleaned = value
        .trim()
        .trim_matches(|c| c == '"' || c == '<' || c == '>')
        .trim();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_string())
    }
}

/// Parse `YYYY:MM:DD HH:MM:SS`; the all-zero value means unset.
pub fn parse_exif_datetime(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim().trim_matches('"').trim();
    if value.is_empty() || value.chars().all(|c| matches!(c, '0' | ':' | ' ')) {
        return None;
    }
    NaiveDateTime::parse_from_str(value, EXIF_INPUT_FORMAT)
        .ok()
        .map(|dt| dt.and_utc())
}

pub fn format_exif_time(time: &DateTime<Utc>) -> String {
    time.format(EXIF_OUTPUT_FORMAT).to_string()
}

/// Parse a value produced by [`format_exif_time`].
pub fn parse_stored_time(value: &str) -> Option<DateTime<Utc>> {
    let trimmed = value.trim().trim_end_matches(" UTC");
    DateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S %z")
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

pub fn format_coords(lat: f64, lon: f64) -> String {
    format!("{:.6},{:.6}", lat, lon)
}

fn ascii_value(field: &exif::Field) -> Option<String> {
    match field.value {
        exif::Value::Ascii(ref parts) => parts
            .first()
            .map(|p| String::from_utf8_lossy(p).trim_end_matches('\0').to_string()),
        _ => Some(field.display_value().to_string()),
    }
}

fn rational_triplet(value: &exif::Value) -> Option<f64> {
    if let exif::Value::Rational(ref v) = value {
        if v.len() >= 3 {
            return Some(dms_to_decimal(v[0].to_f64(), v[1].to_f64(), v[2].to_f64()));
        }
    }
    None
}

fn dms_to_decimal(degrees: f64, minutes: f64, seconds: f64) -> f64 {
    degrees + minutes / 60.0 + seconds / 3600.0
}

/// Walk the EXIF tag tree of an in-memory image.
///
/// Fails when the container carries no parsable EXIF block; callers treat
/// that as non-fatal and keep the fields unset.
pub fn extract_exif(media: &[u8]) -> Result<ExifInfo> {
    let mut cursor = Cursor::new(media);
    let exif = exif::Reader::new()
        .read_from_container(&mut cursor)
        .map_err(|e| Error::Decode(format!("exif: {}", e)))?;

    let mut info = ExifInfo::default();

    if let Some(field) = exif.get_field(exif::Tag::Model, exif::In::PRIMARY) {
        info.model = ascii_value(field).and_then(|v| clean_camera_string(&v));
    }

    if let Some(field) = exif.get_field(exif::Tag::Make, exif::In::PRIMARY) {
        info.make = ascii_value(field).and_then(|v| clean_camera_string(&v));
    }

    if let Some(field) = exif.get_field(exif::Tag::DateTime, exif::In::PRIMARY) {
        info.taken_time = ascii_value(field).and_then(|v| parse_exif_datetime(&v));
    }

    if let Some(field) = exif.get_field(exif::Tag::DateTimeOriginal, exif::In::PRIMARY) {
        info.original_time = ascii_value(field).and_then(|v| parse_exif_datetime(&v));
    }

    if let Some(field) = exif.get_field(exif::Tag::PixelXDimension, exif::In::PRIMARY) {
        info.x_dim = field.value.get_uint(0);
    }

    if let Some(field) = exif.get_field(exif::Tag::PixelYDimension, exif::In::PRIMARY) {
        info.y_dim = field.value.get_uint(0);
    }

    if let Some(field) = exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY) {
        info.orientation = field.value.get_uint(0).map(|v| v.to_string());
    }

    let lat = exif
        .get_field(exif::Tag::GPSLatitude, exif::In::PRIMARY)
        .and_then(|f| rational_triplet(&f.value));
    let lon = exif
        .get_field(exif::Tag::GPSLongitude, exif::In::PRIMARY)
        .and_then(|f| rational_triplet(&f.value));

    if let (Some(lat), Some(lon)) = (lat, lon) {
        let south = exif
            .get_field(exif::Tag::GPSLatitudeRef, exif::In::PRIMARY)
            .map(|f| f.display_value().to_string().contains('S'))
            .unwrap_or(false);
        let west = exif
            .get_field(exif::Tag::GPSLongitudeRef, exif::In::PRIMARY)
            .map(|f| f.display_value().to_string().contains('W'))
            .unwrap_or(false);

        let lat = if south { -lat } else { lat };
        let lon = if west { -lon } else { lon };
        info.gps_latitude = Some(lat);
        info.gps_longitude = Some(lon);
        info.gps_coords = Some(format_coords(lat, lon));
    }

    let mut raw = Map::new();
    for field in exif.fields().filter(|f| f.ifd_num == exif::In::PRIMARY) {
        raw.insert(
            field.tag.to_string(),
            JsonValue::String(field.display_value().with_unit(&exif).to_string()),
        );
    }
    if !raw.is_empty() {
        info.raw = Some(serde_json::to_string(&raw)?);
    }

    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_parse_exif_datetime() {
        let dt = parse_exif_datetime("2023:08:14 10:00:00").unwrap();
        assert_eq!((dt.year(), dt.month(), dt.day()), (2023, 8, 14));
        assert_eq!(dt.hour(), 10);
        assert_eq!(parse_exif_datetime("0000:00:00 00:00:00"), None);
        assert_eq!(parse_exif_datetime("garbage"), None);
        assert_eq!(parse_exif_datetime(""), None);
    }

    #[test]
    fn test_canonical_time_round_trip() {
        let dt = parse_exif_datetime("2023:08:14 10:00:00").unwrap();
        let text = format_exif_time(&dt);
        assert_eq!(text, "2023-08-14 10:00:00 +0000 UTC");
        assert_eq!(parse_stored_time(&text), Some(dt));
    }

    #[test]
    fn test_clean_camera_string() {
        assert_eq!(clean_camera_string("\"Canon\"").as_deref(), Some("Canon"));
        assert_eq!(
            clean_camera_string("<iPhone 12 Pro>").as_deref(),
            Some("iPhone 12 Pro")
        );
        assert_eq!(clean_camera_string("\"\""), None);
    }

    #[test]
    fn test_coords_format() {
        assert_eq!(format_coords(48.1, -11.5), "48.100000,-11.500000");
        assert!((dms_to_decimal(48.0, 30.0, 36.0) - 48.51).abs() < 1e-9);
    }

    #[test]
    fn test_no_exif_is_error() {
        assert!(extract_exif(b"not an image").is_err());
    }
}
