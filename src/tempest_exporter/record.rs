// tempest_exporter - Prometheus metrics exporter for WeatherFlow Tempest stations
//
// Copyright 2024 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use serde::de::IgnoredAny;
use serde::Deserialize;
use std::collections::BTreeMap;

/// Suffix appended to a base field name to form the name of its indoor counterpart.
pub const INDOOR_SUFFIX: &str = "_indoor";

/// Label names mapped to label values, one entry per label.
pub type LabelSet = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Numeric,
    Text,
}

/// One row of the observation schema.
///
/// A field with `indoor` set has a sibling reading from an indoor sensor, named by
/// appending [`INDOOR_SUFFIX`] to `name` (e.g. `air_temperature_indoor`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub indoor: bool,
}

impl FieldSpec {
    const fn numeric(name: &'static str) -> Self {
        FieldSpec {
            name,
            kind: FieldKind::Numeric,
            indoor: false,
        }
    }

    const fn text(name: &'static str) -> Self {
        FieldSpec {
            name,
            kind: FieldKind::Text,
            indoor: false,
        }
    }

    const fn with_indoor(self) -> Self {
        FieldSpec { indoor: true, ..self }
    }

    /// Name of the indoor counterpart of this field, if it has one.
    pub fn indoor_name(&self) -> Option<String> {
        if self.indoor {
            Some(format!("{}{}", self.name, INDOOR_SUFFIX))
        } else {
            None
        }
    }
}

/// Every base field of a station observation returned by the WeatherFlow REST API.
///
/// New upstream fields only need a row here: decoding, the indoor overlay, and metric
/// registration all iterate this table.
pub const FIELDS: &[FieldSpec] = &[
    FieldSpec::numeric("air_density").with_indoor(),
    FieldSpec::numeric("air_temperature").with_indoor(),
    FieldSpec::numeric("barometric_pressure").with_indoor(),
    FieldSpec::numeric("brightness"),
    FieldSpec::numeric("delta_t").with_indoor(),
    FieldSpec::numeric("dew_point").with_indoor(),
    FieldSpec::numeric("feels_like").with_indoor(),
    FieldSpec::numeric("heat_index").with_indoor(),
    FieldSpec::numeric("lightning_strike_count").with_indoor(),
    FieldSpec::numeric("lightning_strike_count_last_1hr").with_indoor(),
    FieldSpec::numeric("lightning_strike_count_last_3hr").with_indoor(),
    FieldSpec::numeric("lightning_strike_last_distance").with_indoor(),
    FieldSpec::numeric("lightning_strike_last_epoch").with_indoor(),
    FieldSpec::numeric("precip"),
    FieldSpec::numeric("precip_accum_last_1hr"),
    FieldSpec::numeric("precip_accum_local_day"),
    FieldSpec::numeric("precip_accum_local_yesterday"),
    FieldSpec::numeric("precip_accum_local_yesterday_final"),
    FieldSpec::numeric("precip_analysis_type_yesterday"),
    FieldSpec::numeric("precip_minutes_local_day"),
    FieldSpec::numeric("precip_minutes_local_yesterday"),
    FieldSpec::numeric("precip_minutes_local_yesterday_final"),
    FieldSpec::text("pressure_trend").with_indoor(),
    FieldSpec::numeric("relative_humidity").with_indoor(),
    FieldSpec::numeric("sea_level_pressure").with_indoor(),
    FieldSpec::numeric("solar_radiation"),
    FieldSpec::numeric("station_pressure").with_indoor(),
    FieldSpec::numeric("timestamp"),
    FieldSpec::numeric("uv"),
    FieldSpec::numeric("wet_bulb_temperature").with_indoor(),
    FieldSpec::numeric("wind_avg"),
    FieldSpec::numeric("wind_chill").with_indoor(),
    FieldSpec::numeric("wind_direction"),
    FieldSpec::numeric("wind_gust"),
    FieldSpec::numeric("wind_lull"),
];

/// Names of all numeric base fields, in schema order.
pub fn numeric_fields() -> impl Iterator<Item = &'static str> {
    FIELDS
        .iter()
        .filter(|f| f.kind == FieldKind::Numeric)
        .map(|f| f.name)
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Numeric(f64),
    Text(String),
}

impl FieldValue {
    fn zero(kind: FieldKind) -> Self {
        match kind {
            FieldKind::Numeric => FieldValue::Numeric(0.0),
            FieldKind::Text => FieldValue::Text(String::new()),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Numeric(v) => Some(*v),
            FieldValue::Text(_) => None,
        }
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Numeric(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Text(v.to_owned())
    }
}

/// A single observation snapshot: field names mapped to their values.
///
/// Records decoded from the API always contain every field of [`FIELDS`] plus the
/// indoor counterparts of those that have one. The upstream API doesn't distinguish
/// an absent reading from a zero reading, so fields that are missing, `null`, or of
/// an unexpected type are stored as `0.0` (or `""` for text fields).
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(from = "RawRecord")]
pub struct Record {
    fields: BTreeMap<String, FieldValue>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<S: Into<String>, V: Into<FieldValue>>(&mut self, name: S, value: V) -> Option<FieldValue> {
        self.fields.insert(name.into(), value.into())
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut FieldValue> {
        self.fields.get_mut(name)
    }

    /// Value of a field if it exists and is numeric.
    pub fn numeric(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(FieldValue::as_f64)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<S: Into<String>, V: Into<FieldValue>> FromIterator<(S, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (S, V)>>(iter: I) -> Self {
        let mut record = Record::new();
        for (name, value) in iter {
            record.insert(name, value);
        }
        record
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawValue {
    Number(f64),
    Text(String),
    Other(IgnoredAny),
}

#[derive(Deserialize)]
#[serde(transparent)]
struct RawRecord(BTreeMap<String, RawValue>);

impl From<RawRecord> for Record {
    fn from(raw: RawRecord) -> Self {
        let RawRecord(mut raw) = raw;
        let mut record = Record::new();

        for spec in FIELDS {
            let names = std::iter::once(spec.name.to_owned()).chain(spec.indoor_name());
            for name in names {
                let value = match (spec.kind, raw.remove(&name)) {
                    (FieldKind::Numeric, Some(RawValue::Number(v))) => FieldValue::Numeric(v),
                    (FieldKind::Text, Some(RawValue::Text(s))) => FieldValue::Text(s),
                    (kind, _) => FieldValue::zero(kind),
                };
                record.insert(name, value);
            }
        }

        record
    }
}

/// Identity and location of a station, used as labels for every metric.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Identity {
    pub station_id: u64,
    pub station_name: String,
    pub public_name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub timezone: String,
    pub elevation: f64,
}

impl Identity {
    pub const LABEL_KEYS: &'static [&'static str] = &[
        "station_id",
        "station_name",
        "public_name",
        "latitude",
        "longitude",
        "timezone",
        "elevation",
    ];

    pub fn labels(&self) -> LabelSet {
        let values = [
            self.station_id.to_string(),
            self.station_name.clone(),
            self.public_name.clone(),
            self.latitude.to_string(),
            self.longitude.to_string(),
            self.timezone.clone(),
            self.elevation.to_string(),
        ];

        Self::LABEL_KEYS
            .iter()
            .map(|k| k.to_string())
            .zip(values)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::{numeric_fields, FieldKind, FieldValue, Identity, Record, FIELDS};

    #[test]
    fn test_schema_names_unique() {
        let mut names: Vec<String> = FIELDS
            .iter()
            .flat_map(|f| std::iter::once(f.name.to_owned()).chain(f.indoor_name()))
            .collect();
        let total = names.len();
        names.sort();
        names.dedup();

        assert_eq!(total, names.len());
    }

    #[test]
    fn test_numeric_fields_skip_text() {
        let names: Vec<&str> = numeric_fields().collect();

        assert_eq!(FIELDS.len() - 1, names.len());
        assert!(names.contains(&"air_temperature"));
        assert!(!names.contains(&"pressure_trend"));
        assert!(FIELDS.iter().any(|f| f.name == "pressure_trend" && f.kind == FieldKind::Text));
    }

    #[test]
    fn test_decode_fills_full_shape() {
        let record: Record = serde_json::from_str(
            r#"{
                "air_temperature": 15.5,
                "air_temperature_indoor": 21,
                "relative_humidity": null,
                "pressure_trend": "steady",
                "wind_avg": "fast",
                "sensor_status": 655360
            }"#,
        )
        .unwrap();

        let indoor = FIELDS.iter().filter(|f| f.indoor).count();
        assert_eq!(FIELDS.len() + indoor, record.len());
        assert_eq!(Some(15.5), record.numeric("air_temperature"));
        assert_eq!(Some(21.0), record.numeric("air_temperature_indoor"));
        assert_eq!(Some(0.0), record.numeric("relative_humidity"));
        assert_eq!(Some(0.0), record.numeric("wind_avg"));
        assert_eq!(Some(&FieldValue::from("steady")), record.get("pressure_trend"));
        assert_eq!(Some(&FieldValue::from("")), record.get("pressure_trend_indoor"));
        assert_eq!(None, record.get("sensor_status"));
    }

    #[test]
    fn test_identity_labels() {
        let identity = Identity {
            station_id: 42,
            station_name: "Home".to_owned(),
            public_name: "Main St".to_owned(),
            latitude: 42.3601,
            longitude: -71.0589,
            timezone: "America/New_York".to_owned(),
            elevation: 12.0,
        };

        let labels = identity.labels();

        assert_eq!(Identity::LABEL_KEYS.len(), labels.len());
        assert_eq!("42", labels["station_id"]);
        assert_eq!("Home", labels["station_name"]);
        assert_eq!("42.3601", labels["latitude"]);
        assert_eq!("-71.0589", labels["longitude"]);
        assert_eq!("12", labels["elevation"]);
    }
}
