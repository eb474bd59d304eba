//! Visit events recorded against a short link

use serde::{Deserialize, Deserializer, Serialize};
use sqlx::FromRow;

/// Placeholder used for every text field the visit could not resolve
pub const UNKNOWN: &str = "Unknown";

/// Referrer value for visits without an attributable source
pub const DIRECT: &str = "Direct";

/// Device category derived from the user agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum Device {
    #[default]
    Desktop,
    Mobile,
    Tablet,
    Bot,
}

impl Device {
    /// Fixed slot order used by the device breakdown vector
    pub const ALL: [Device; 4] = [Device::Desktop, Device::Mobile, Device::Tablet, Device::Bot];

    pub fn as_str(self) -> &'static str {
        match self {
            Device::Desktop => "Desktop",
            Device::Mobile => "Mobile",
            Device::Tablet => "Tablet",
            Device::Bot => "Bot",
        }
    }

    pub fn index(self) -> usize {
        match self {
            Device::Desktop => 0,
            Device::Mobile => 1,
            Device::Tablet => 2,
            Device::Bot => 3,
        }
    }

    /// Parse a stored label. Anything unrecognised folds into `Desktop`.
    pub fn from_label(label: &str) -> Self {
        match label {
            "Mobile" => Device::Mobile,
            "Tablet" => Device::Tablet,
            "Bot" => Device::Bot,
            _ => Device::Desktop,
        }
    }
}

/// Stored labels are free text; unrecognised or null ones fold into `Desktop`
impl<'de> Deserialize<'de> for Device {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let label = Option::<String>::deserialize(deserializer)?;
        Ok(label.as_deref().map(Device::from_label).unwrap_or_default())
    }
}

/// One recorded, classified visit. Immutable once appended.
///
/// Every field is optional on input: legacy records with missing or null
/// fields load with the same defaults as legacy database rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisitEvent {
    /// Epoch milliseconds (UTC). Zero when the record carries none.
    #[serde(default, deserialize_with = "null_as_default")]
    pub timestamp: i64,
    #[serde(default)]
    pub device: Device,
    #[serde(default = "unknown", deserialize_with = "unknown_if_blank")]
    pub os: String,
    #[serde(default = "unknown", deserialize_with = "unknown_if_blank")]
    pub ip: String,
    #[serde(default = "unknown", deserialize_with = "unknown_if_blank")]
    pub location: String,
    #[serde(default = "unknown", deserialize_with = "unknown_if_blank")]
    pub region: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub latitude: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub longitude: f64,
    #[serde(default = "direct", deserialize_with = "direct_if_blank")]
    pub referrer: String,
}

fn unknown() -> String {
    UNKNOWN.to_string()
}

fn direct() -> String {
    DIRECT.to_string()
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn unknown_if_blank<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(non_empty(Option::deserialize(deserializer)?, UNKNOWN))
}

fn direct_if_blank<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(non_empty(Option::deserialize(deserializer)?, DIRECT))
}

impl VisitEvent {
    /// An event at `timestamp` with every other field at its default
    pub fn at(timestamp: i64) -> Self {
        Self {
            timestamp,
            device: Device::Desktop,
            os: unknown(),
            ip: unknown(),
            location: unknown(),
            region: unknown(),
            latitude: 0.0,
            longitude: 0.0,
            referrer: direct(),
        }
    }
}

/// Row shape of the `visits` table.
///
/// Every column but the key is nullable so rows written by older versions
/// still load; [`From<VisitRow>`] fills the gaps with the documented defaults.
#[derive(Debug, Clone, FromRow)]
pub struct VisitRow {
    pub id: i64,
    pub short_code: String,
    pub timestamp: Option<i64>,
    pub device: Option<String>,
    pub os: Option<String>,
    pub ip: Option<String>,
    pub location: Option<String>,
    pub region: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub referrer: Option<String>,
}

fn non_empty(value: Option<String>, default: &str) -> String {
    match value {
        Some(v) if !v.is_empty() => v,
        _ => default.to_string(),
    }
}

impl From<VisitRow> for VisitEvent {
    fn from(row: VisitRow) -> Self {
        Self {
            timestamp: row.timestamp.unwrap_or(0),
            device: row
                .device
                .as_deref()
                .map(Device::from_label)
                .unwrap_or_default(),
            os: non_empty(row.os, UNKNOWN),
            ip: non_empty(row.ip, UNKNOWN),
            location: non_empty(row.location, UNKNOWN),
            region: non_empty(row.region, UNKNOWN),
            latitude: row.latitude.unwrap_or(0.0),
            longitude: row.longitude.unwrap_or(0.0),
            referrer: non_empty(row.referrer, DIRECT),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_device_labels_fold_into_desktop() {
        assert_eq!(Device::from_label("Mobile"), Device::Mobile);
        assert_eq!(Device::from_label("Smart TV"), Device::Desktop);
        assert_eq!(Device::from_label(""), Device::Desktop);
    }

    #[test]
    fn legacy_rows_load_with_defaults() {
        let row = VisitRow {
            id: 1,
            short_code: "abc".to_string(),
            timestamp: Some(1_700_000_000_000),
            device: None,
            os: None,
            ip: Some(String::new()),
            location: None,
            region: None,
            latitude: None,
            longitude: None,
            referrer: None,
        };

        let event = VisitEvent::from(row);
        assert_eq!(event.device, Device::Desktop);
        assert_eq!(event.os, UNKNOWN);
        assert_eq!(event.ip, UNKNOWN);
        assert_eq!(event.region, UNKNOWN);
        assert_eq!(event.referrer, DIRECT);
        assert_eq!(event.latitude, 0.0);
    }

    #[test]
    fn sparse_json_records_deserialize() {
        let event: VisitEvent =
            serde_json::from_str(r#"{"timestamp": 5, "device": "Mobile"}"#).unwrap();
        assert_eq!(event.device, Device::Mobile);
        assert_eq!(event.location, UNKNOWN);
        assert_eq!(event.referrer, DIRECT);
    }

    #[test]
    fn undated_records_load_as_zero() {
        let events: Vec<VisitEvent> =
            serde_json::from_str(r#"[{"device":"Mobile","ip":"1.2.3.4"}, {"timestamp": null}]"#)
                .unwrap();
        assert_eq!(events[0].timestamp, 0);
        assert_eq!(events[0].ip, "1.2.3.4");
        assert_eq!(events[1].timestamp, 0);
    }

    #[test]
    fn unrecognised_device_label_folds_on_load() {
        let event: VisitEvent =
            serde_json::from_str(r#"{"timestamp": 5, "device": "Smart TV"}"#).unwrap();
        assert_eq!(event.device, Device::Desktop);

        let event: VisitEvent =
            serde_json::from_str(r#"{"timestamp": 5, "device": null}"#).unwrap();
        assert_eq!(event.device, Device::Desktop);
    }

    #[test]
    fn null_fields_take_their_defaults() {
        let event: VisitEvent = serde_json::from_str(
            r#"{"timestamp": 5, "os": null, "ip": "", "referrer": null, "latitude": null}"#,
        )
        .unwrap();
        assert_eq!(event.os, UNKNOWN);
        assert_eq!(event.ip, UNKNOWN);
        assert_eq!(event.referrer, DIRECT);
        assert_eq!(event.latitude, 0.0);
    }
}
