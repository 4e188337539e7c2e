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

use crate::record::{LabelSet, Record};
use prometheus_client::encoding::{EncodeMetric, MetricEncoder};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::MetricType;
use prometheus_client::registry::Registry;
use std::collections::HashSet;
use std::error;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

pub const NAMESPACE: &str = "tempest";
pub const SUBSYSTEM: &str = "station";
const SUBSYSTEM_EXPORTER: &str = "exporter";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetricsError {
    AlreadyInitialized,
    NoFields,
    DuplicateField(String),
}

impl fmt::Display for MetricsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyInitialized => write!(f, "station metrics already initialized"),
            Self::NoFields => write!(f, "no fields to create station metrics for"),
            Self::DuplicateField(name) => write!(f, "duplicate field {}", name),
        }
    }
}

impl error::Error for MetricsError {}

/// Current value of a single series along with its labels.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub name: String,
    pub labels: Vec<(String, String)>,
    pub value: f64,
}

#[derive(Debug, Clone)]
struct Reading {
    labels: Vec<(String, String)>,
    value: f64,
}

/// Gauge with a single series whose label values may change on every update.
///
/// Labels and value are swapped together under one lock so an encoder never sees
/// the value from one update paired with the labels of another. Nothing is encoded
/// until the first call to `set`.
#[derive(Debug, Clone, Default)]
struct FieldGauge {
    reading: Arc<RwLock<Option<Reading>>>,
}

impl FieldGauge {
    fn set(&self, labels: Vec<(String, String)>, value: f64) {
        let mut reading = self.reading.write().unwrap_or_else(PoisonError::into_inner);
        *reading = Some(Reading { labels, value });
    }

    /// Replace labels and keep the current value. A gauge that was never set stays unset.
    fn relabel(&self, labels: Vec<(String, String)>) {
        let mut reading = self.reading.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(r) = reading.as_mut() {
            r.labels = labels;
        }
    }

    fn get(&self) -> Option<Reading> {
        self.reading.read().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl EncodeMetric for FieldGauge {
    fn encode(&self, mut encoder: MetricEncoder) -> Result<(), fmt::Error> {
        let reading = self.reading.read().unwrap_or_else(PoisonError::into_inner);
        match reading.as_ref() {
            Some(r) => encoder.encode_family(&r.labels)?.encode_gauge(&r.value),
            None => Ok(()),
        }
    }

    fn metric_type(&self) -> MetricType {
        MetricType::Gauge
    }
}

#[derive(Debug)]
struct Series {
    label_keys: Vec<String>,
    gauges: Vec<(String, FieldGauge)>,
}

/// One gauge per observation field, all sharing the same set of station labels.
///
/// Metrics are registered by `StationMetrics::initialize()` and are named
/// `tempest_station_$FIELD`. The set of metrics is fixed from that point on: fields
/// of later records that weren't known at initialization are ignored.
#[derive(Debug, Default)]
pub struct StationMetrics {
    series: Option<Series>,
}

impl StationMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a gauge for each field name and register it with the provided `Registry`.
    ///
    /// Label keys are fixed here; their values are set by each call to `apply()`. This
    /// may only be called once, and at least one field is required.
    pub fn initialize<I, S, K>(&mut self, reg: &mut Registry, field_names: I, label_keys: &[K]) -> Result<(), MetricsError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        K: AsRef<str>,
    {
        if self.series.is_some() {
            return Err(MetricsError::AlreadyInitialized);
        }

        let mut seen = HashSet::new();
        let mut gauges = Vec::new();
        for name in field_names {
            let name = name.into();
            if !seen.insert(name.clone()) {
                return Err(MetricsError::DuplicateField(name));
            }
            gauges.push((name, FieldGauge::default()));
        }

        if gauges.is_empty() {
            return Err(MetricsError::NoFields);
        }

        let mut keys_seen = HashSet::new();
        let label_keys: Vec<String> = label_keys
            .iter()
            .map(|k| k.as_ref().to_owned())
            .filter(|k| keys_seen.insert(k.clone()))
            .collect();

        let sub = reg.sub_registry_with_prefix(NAMESPACE).sub_registry_with_prefix(SUBSYSTEM);
        for (name, gauge) in gauges.iter() {
            sub.register(
                name.as_str(),
                format!("Current value of the {} station observation field", name),
                gauge.clone(),
            );
        }

        tracing::debug!(message = "registered station metrics", num_metrics = gauges.len(), num_labels = label_keys.len());
        self.series = Some(Series { label_keys, gauges });
        Ok(())
    }

    /// Set every registered gauge from the matching numeric field of `record`.
    ///
    /// Every gauge that has been set has its labels replaced by `labels`. Registered
    /// fields that are missing from the record or hold text keep their previous value.
    /// Does nothing if metrics haven't been initialized.
    pub fn apply(&self, record: &Record, labels: &LabelSet) {
        let series = match &self.series {
            Some(s) => s,
            None => {
                tracing::debug!(message = "skipping update of uninitialized station metrics");
                return;
            }
        };

        let label_values: Vec<(String, String)> = series
            .label_keys
            .iter()
            .map(|k| (k.clone(), labels.get(k).cloned().unwrap_or_default()))
            .collect();

        for (name, gauge) in series.gauges.iter() {
            match record.numeric(name) {
                Some(v) => gauge.set(label_values.clone(), v),
                None => gauge.relabel(label_values.clone()),
            }
        }
    }

    /// Current value and labels of every gauge that has been set at least once.
    pub fn snapshot(&self) -> Vec<Sample> {
        self.series
            .iter()
            .flat_map(|s| s.gauges.iter())
            .filter_map(|(name, gauge)| {
                gauge.get().map(|r| Sample {
                    name: name.clone(),
                    labels: r.labels,
                    value: r.value,
                })
            })
            .collect()
    }

    /// Number of registered gauges.
    pub fn len(&self) -> usize {
        self.series.as_ref().map(|s| s.gauges.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Health of the refresh loop.
///
/// Metrics are named `tempest_exporter_*` and let failed fetches be noticed from the
/// scrape side, since previous observation values stay exposed when a fetch fails.
#[derive(Debug, Clone)]
pub struct RefreshMetrics {
    attempts: Counter,
    failures: Counter,
    last_success: Gauge,
}

impl RefreshMetrics {
    pub fn new(reg: &mut Registry) -> Self {
        let attempts = Counter::default();
        let failures = Counter::default();
        let last_success = Gauge::default();

        let sub = reg
            .sub_registry_with_prefix(NAMESPACE)
            .sub_registry_with_prefix(SUBSYSTEM_EXPORTER);
        sub.register("refresh_attempts", "Attempts to fetch station observations", attempts.clone());
        sub.register("refresh_failures", "Failed attempts to fetch station observations", failures.clone());
        sub.register(
            "last_success_timestamp_seconds",
            "Time of the last successful fetch, as a UNIX timestamp",
            last_success.clone(),
        );

        Self {
            attempts,
            failures,
            last_success,
        }
    }

    pub fn attempt(&self) {
        self.attempts.inc();
    }

    pub fn failure(&self) {
        self.failures.inc();
    }

    pub fn success(&self, at: SystemTime) {
        let secs = at.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
        self.last_success.set(i64::try_from(secs).unwrap_or(i64::MAX));
    }

    pub fn failures(&self) -> u64 {
        self.failures.get()
    }
}

#[cfg(test)]
mod tests {
    use super::{MetricsError, RefreshMetrics, StationMetrics};
    use crate::record::{numeric_fields, Identity, LabelSet, Record};
    use prometheus_client::encoding::text::encode;
    use prometheus_client::registry::Registry;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::{Duration, UNIX_EPOCH};

    fn labels(pairs: &[(&str, &str)]) -> LabelSet {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn initialized(fields: &[&str], keys: &[&str]) -> (Registry, StationMetrics) {
        let mut reg = Registry::default();
        let mut metrics = StationMetrics::new();
        metrics.initialize(&mut reg, fields.iter().copied(), keys).unwrap();
        (reg, metrics)
    }

    #[test]
    fn test_initialize_twice() {
        let (mut reg, mut metrics) = initialized(&["air_temperature"], &["station_id"]);
        let res = metrics.initialize(&mut reg, ["wind_avg"], &["station_id"]);

        assert_eq!(Err(MetricsError::AlreadyInitialized), res);
        assert_eq!(1, metrics.len());
    }

    #[test]
    fn test_initialize_no_fields() {
        let mut reg = Registry::default();
        let mut metrics = StationMetrics::new();
        let res = metrics.initialize(&mut reg, Vec::<String>::new(), Identity::LABEL_KEYS);

        assert_eq!(Err(MetricsError::NoFields), res);
        assert!(metrics.is_empty());
    }

    #[test]
    fn test_initialize_duplicate_field() {
        let mut reg = Registry::default();
        let mut metrics = StationMetrics::new();
        let res = metrics.initialize(&mut reg, ["uv", "uv"], Identity::LABEL_KEYS);

        assert_eq!(Err(MetricsError::DuplicateField("uv".to_owned())), res);
    }

    #[test]
    fn test_apply_before_initialize() {
        let metrics = StationMetrics::new();
        let record: Record = [("uv", 3.0)].into_iter().collect();
        metrics.apply(&record, &LabelSet::new());

        assert!(metrics.snapshot().is_empty());
    }

    #[test]
    fn test_shape_is_fixed() {
        let mut reg = Registry::default();
        let mut metrics = StationMetrics::new();
        metrics.initialize(&mut reg, numeric_fields(), Identity::LABEL_KEYS).unwrap();
        let expected = numeric_fields().count();

        let full: Record = serde_json::from_str("{}").unwrap();
        metrics.apply(&full, &LabelSet::new());
        assert_eq!(expected, metrics.len());
        assert_eq!(expected, metrics.snapshot().len());

        let mut extra = Record::new();
        extra.insert("uv", 2.0);
        extra.insert("soil_moisture", 31.0);
        metrics.apply(&extra, &LabelSet::new());
        assert_eq!(expected, metrics.len());
        assert_eq!(expected, metrics.snapshot().len());
        assert!(metrics.snapshot().iter().all(|s| s.name != "soil_moisture"));
    }

    #[test]
    fn test_missing_and_text_fields_keep_previous_value() {
        let (_reg, metrics) = initialized(&["uv", "pressure_trend"], &["station_id"]);
        let first: Record = [("uv", 4.0)].into_iter().collect();
        metrics.apply(&first, &labels(&[("station_id", "1")]));

        let mut second = Record::new();
        second.insert("pressure_trend", "rising");
        metrics.apply(&second, &labels(&[("station_id", "2")]));

        let snapshot = metrics.snapshot();
        assert_eq!(1, snapshot.len());
        assert_eq!("uv", snapshot[0].name);
        assert_eq!(4.0, snapshot[0].value);
        assert_eq!(vec![("station_id".to_owned(), "2".to_owned())], snapshot[0].labels);
    }

    #[test]
    fn test_labels_replaced_on_omitted_fields() {
        let (_reg, metrics) = initialized(&["uv", "wind_avg"], &["station_name"]);
        let both: Record = [("uv", 3.0), ("wind_avg", 2.0)].into_iter().collect();
        metrics.apply(&both, &labels(&[("station_name", "Old")]));

        let only_uv: Record = [("uv", 5.0)].into_iter().collect();
        metrics.apply(&only_uv, &labels(&[("station_name", "New")]));

        let expected = vec![("station_name".to_owned(), "New".to_owned())];
        let snapshot = metrics.snapshot();
        assert_eq!(2, snapshot.len());
        for sample in snapshot.iter() {
            assert_eq!(expected, sample.labels, "series {}", sample.name);
        }
        assert_eq!(Some(5.0), snapshot.iter().find(|s| s.name == "uv").map(|s| s.value));
        assert_eq!(Some(2.0), snapshot.iter().find(|s| s.name == "wind_avg").map(|s| s.value));
    }

    #[test]
    fn test_value_and_labels_update_together() {
        let (_reg, metrics) = initialized(&["uv"], &["station_id"]);
        let updates: Vec<(Record, LabelSet)> = [(1.0, "1"), (2.0, "2")]
            .iter()
            .map(|(v, id)| ([("uv", *v)].into_iter().collect(), labels(&[("station_id", *id)])))
            .collect();
        let done = AtomicBool::new(false);

        thread::scope(|s| {
            s.spawn(|| {
                for i in 0..10_000 {
                    let (record, labels) = &updates[i % 2];
                    metrics.apply(record, labels);
                }
                done.store(true, Ordering::Release);
            });

            s.spawn(|| {
                while !done.load(Ordering::Acquire) {
                    for sample in metrics.snapshot() {
                        let expected = format!("{}", sample.value);
                        assert_eq!(vec![("station_id".to_owned(), expected)], sample.labels);
                    }
                }
            });
        });
    }

    #[test]
    fn test_labels_replaced() {
        let (_reg, metrics) = initialized(&["uv", "wind_avg"], &["station_id", "station_name"]);
        let record: Record = [("uv", 1.0), ("wind_avg", 2.0)].into_iter().collect();

        metrics.apply(&record, &labels(&[("station_id", "1"), ("station_name", "Old")]));
        metrics.apply(
            &record,
            &labels(&[("station_id", "1"), ("station_name", "New"), ("timezone", "UTC")]),
        );

        let expected = vec![
            ("station_id".to_owned(), "1".to_owned()),
            ("station_name".to_owned(), "New".to_owned()),
        ];
        for sample in metrics.snapshot() {
            assert_eq!(expected, sample.labels, "series {}", sample.name);
        }
    }

    #[test]
    fn test_missing_label_is_empty() {
        let (_reg, metrics) = initialized(&["uv"], &["station_id", "timezone"]);
        let record: Record = [("uv", 1.0)].into_iter().collect();
        metrics.apply(&record, &labels(&[("station_id", "9")]));

        let snapshot = metrics.snapshot();
        assert_eq!(
            vec![
                ("station_id".to_owned(), "9".to_owned()),
                ("timezone".to_owned(), String::new()),
            ],
            snapshot[0].labels
        );
    }

    #[test]
    fn test_encode_text() {
        let (reg, metrics) = initialized(&["air_temperature", "uv"], &["station_id", "station_name"]);
        let record: Record = [("air_temperature", 18.0)].into_iter().collect();
        metrics.apply(&record, &labels(&[("station_id", "42"), ("station_name", "Home")]));

        let mut buf = String::new();
        encode(&mut buf, &reg).unwrap();

        assert!(buf.contains("# TYPE tempest_station_air_temperature gauge"));
        assert!(buf.contains(r#"tempest_station_air_temperature{station_id="42",station_name="Home"} 18"#));
        assert!(buf.contains("# TYPE tempest_station_uv gauge"));
        assert!(!buf.contains("tempest_station_uv{"));
    }

    #[test]
    fn test_refresh_metrics() {
        let mut reg = Registry::default();
        let health = RefreshMetrics::new(&mut reg);
        health.attempt();
        health.attempt();
        health.failure();
        health.success(UNIX_EPOCH + Duration::from_secs(1_700_000_000));

        let mut buf = String::new();
        encode(&mut buf, &reg).unwrap();

        assert_eq!(1, health.failures());
        assert!(buf.contains("tempest_exporter_refresh_attempts_total 2"));
        assert!(buf.contains("tempest_exporter_refresh_failures_total 1"));
        assert!(buf.contains("tempest_exporter_last_success_timestamp_seconds 1700000000"));
    }
}
