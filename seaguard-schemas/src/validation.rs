//! Canonical Normalizer
//!
//! Maps origin-shaped [`RawReading`]s into [`CanonicalRecord`]s.
//!
//! ## Parameter Names
//!
//! Origins name their parameters freely (`water_level`, `wlp`,
//! `currents_speed`, `wind_speed_q1`, `sst`). A parameter resolves to a
//! product and an observation type by, in order:
//!
//! 1. the canonical product name or storage code (`water_level`, `wl`)
//! 2. a fixed table of origin aliases (`currents_speed`, `wlp`, `velocity`)
//! 3. a trailing observation type (`wind_speed_q1`, `water_level_prediction`)
//!
//! Anything else is a vocabulary violation.
//!
//! ## QC Encodings
//!
//! | Source class  | Accepted QC |
//! |---------------|-------------|
//! | fixed station | flag list `"0,0,1,0"` (all zero → good, else suspect), `v`/`p` verification codes, quality words |
//! | mobile unit   | quality words |
//! | wide area     | quality words |

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use seaguard_core::geo::{valid_latitude, valid_longitude, wrap_longitude};
use seaguard_core::{
    CanonicalRecord, GeoPoint, Measurement, MeasurementEvent, ObservationType, Product,
    QualityFlag, SensorId, SourceClass, UnknownTerm,
};

use crate::registry::SensorRegistry;
use crate::{SchemaError, SchemaResult};

/// One origin parameter value as delivered by a source adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawField {
    /// Origin parameter name
    pub parameter: String,
    /// Origin value; numbers, numeric strings, empty strings and null
    pub value: Value,
    /// Origin QC text, if the origin reports any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qc: Option<String>,
}

impl RawField {
    pub fn new(parameter: impl Into<String>, value: Value) -> Self {
        Self {
            parameter: parameter.into(),
            value,
            qc: None,
        }
    }

    pub fn number(parameter: impl Into<String>, value: f64) -> Self {
        Self::new(parameter, Value::from(value))
    }

    pub fn with_qc(mut self, qc: impl Into<String>) -> Self {
        self.qc = Some(qc.into());
        self
    }
}

/// A source-native reading: one origin row before vocabulary mapping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawReading {
    /// Origin sensor identifier
    pub sensor_id: String,
    /// Origin time text
    pub time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lon: Option<Value>,
    #[serde(default)]
    pub fields: Vec<RawField>,
}

impl RawReading {
    pub fn new(sensor_id: impl Into<String>, time: impl Into<String>) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            time: time.into(),
            lat: None,
            lon: None,
            fields: Vec::new(),
        }
    }

    pub fn at(mut self, lat: f64, lon: f64) -> Self {
        self.lat = Some(Value::from(lat));
        self.lon = Some(Value::from(lon));
        self
    }

    pub fn with_field(mut self, field: RawField) -> Self {
        self.fields.push(field);
        self
    }
}

/// Counts of a normalized batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizeReport {
    pub accepted: usize,
    pub rejected: usize,
}

/// Maps origin readings into canonical records
#[derive(Debug, Clone)]
pub struct Normalizer {
    registry: Arc<SensorRegistry>,
}

impl Normalizer {
    pub fn new(registry: Arc<SensorRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &SensorRegistry {
        &self.registry
    }

    /// Normalize a batch; every reading gets its own outcome
    pub fn normalize(
        &self,
        class: SourceClass,
        readings: &[RawReading],
    ) -> Vec<SchemaResult<CanonicalRecord>> {
        readings
            .iter()
            .map(|reading| {
                let outcome = self.normalize_one(class, reading);
                if let Err(e) = &outcome {
                    log::warn!("rejected {} reading from '{}': {}", class, reading.sensor_id, e);
                }
                outcome
            })
            .collect()
    }

    /// Normalize a batch, keeping accepted records and counting rejections
    pub fn normalize_counted(
        &self,
        class: SourceClass,
        readings: &[RawReading],
    ) -> (Vec<CanonicalRecord>, NormalizeReport) {
        let mut report = NormalizeReport::default();
        let mut records = Vec::with_capacity(readings.len());
        for outcome in self.normalize(class, readings) {
            match outcome {
                Ok(record) => {
                    report.accepted += 1;
                    records.push(record);
                }
                Err(_) => report.rejected += 1,
            }
        }
        (records, report)
    }

    /// Normalize one reading
    pub fn normalize_one(
        &self,
        class: SourceClass,
        reading: &RawReading,
    ) -> SchemaResult<CanonicalRecord> {
        let sensor_id = reading.sensor_id.trim();
        if sensor_id.is_empty() {
            return Err(SchemaError::MissingField("sensor_id"));
        }
        let sensor_id = SensorId::from(sensor_id);
        let datetime = parse_datetime(&reading.time)?;

        let event = match class {
            SourceClass::FixedStation => {
                // location lives on the registry record, not the event
                self.registry.location_of(&sensor_id)?;
                MeasurementEvent::at_station(sensor_id.clone(), datetime)
            }
            SourceClass::MobileUnit | SourceClass::WideArea => {
                if let Some(known) = self.registry.get(&sensor_id)? {
                    if known.source_class() != class {
                        return Err(SchemaError::SourceClassMismatch {
                            sensor_id: sensor_id.to_string(),
                            registered: known.source_class(),
                            claimed: class,
                        });
                    }
                }
                let point = parse_position(reading)?;
                MeasurementEvent::located(sensor_id.clone(), datetime, point)
            }
        };

        let mut measurements = Vec::with_capacity(reading.fields.len());
        for field in &reading.fields {
            let (product, observation_type) = parse_parameter(&field.parameter)?;
            let Some(value) = parse_value(&field.parameter, &field.value)? else {
                continue;
            };
            let quality = parse_quality(class, field.qc.as_deref())?;
            measurements.push(Measurement {
                product,
                value,
                observation_type,
                quality,
            });
        }

        if measurements.is_empty() {
            return Err(SchemaError::EmptyReading(sensor_id.to_string()));
        }

        Ok(CanonicalRecord::new(event, measurements))
    }
}

/// Parse origin time text as UTC
///
/// Accepts RFC 3339 and the naive forms `YYYY-MM-DD HH:MM[:SS]`,
/// `YYYY-MM-DDTHH:MM[:SS]` and `YYYY-MM-DD`.
pub fn parse_datetime(text: &str) -> SchemaResult<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(dt.with_timezone(&Utc));
    }
    for format in [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
    ] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| SchemaError::InvalidDatetime(text.to_string()))
}

const ORIGIN_ALIASES: &[(&str, Product, ObservationType)] = &[
    ("wlp", Product::WaterLevel, ObservationType::Predicted),
    ("tide_prediction", Product::Tide, ObservationType::Predicted),
    ("currents_speed", Product::CurrentSpeed, ObservationType::Observed),
    ("currents_direction", Product::CurrentDirection, ObservationType::Observed),
    ("currents_bin", Product::CurrentBin, ObservationType::Observed),
    ("currents_depth", Product::CurrentDepth, ObservationType::Observed),
    ("currents_velocity_major", Product::CurrentVelocityMajor, ObservationType::Observed),
    ("velocity_major", Product::CurrentVelocityMajor, ObservationType::Observed),
    ("currents_mean_ebb_direction", Product::CurrentEbbDirection, ObservationType::Mean),
    ("currents_mean_flood_direction", Product::CurrentFloodDirection, ObservationType::Mean),
    ("ebb_direction", Product::CurrentEbbDirection, ObservationType::Observed),
    ("flood_direction", Product::CurrentFloodDirection, ObservationType::Observed),
    ("speed", Product::BuoySpeed, ObservationType::Observed),
    ("velocity", Product::BuoySpeed, ObservationType::Observed),
    ("heading", Product::BuoyDirection, ObservationType::Observed),
    ("battery", Product::BatteryTemperature, ObservationType::Observed),
    ("pressure", Product::WaterPressure, ObservationType::Observed),
    ("prev_position_latitude", Product::PreviousLatitude, ObservationType::Observed),
    ("prev_position_longitude", Product::PreviousLongitude, ObservationType::Observed),
    ("position_latitude", Product::Latitude, ObservationType::Observed),
    ("position_longitude", Product::Longitude, ObservationType::Observed),
];

fn base_parameter(name: &str) -> Option<(Product, ObservationType)> {
    Product::lookup(name)
        .map(|p| (p, ObservationType::Observed))
        .or_else(|| {
            ORIGIN_ALIASES
                .iter()
                .find(|(alias, _, _)| alias.eq_ignore_ascii_case(name))
                .map(|(_, p, t)| (*p, *t))
        })
}

/// Resolve an origin parameter name to a product and observation type
pub fn parse_parameter(name: &str) -> SchemaResult<(Product, ObservationType)> {
    let trimmed = name.trim();
    if let Some(found) = base_parameter(trimmed) {
        return Ok(found);
    }

    let lowered = trimmed.to_ascii_lowercase();
    if let Some(rest) = lowered
        .strip_prefix("currents_predictions_")
        .or_else(|| lowered.strip_prefix("predictions_"))
    {
        let product = base_parameter(rest)
            .or_else(|| base_parameter(&format!("currents_{rest}")))
            .map(|(p, _)| p);
        if let Some(product) = product {
            return Ok((product, ObservationType::Predicted));
        }
    }

    for (cut, _) in lowered.rmatch_indices('_') {
        let (head, tail) = (&lowered[..cut], &lowered[cut + 1..]);
        if let (Some((product, _)), Some(observation_type)) =
            (base_parameter(head), ObservationType::from_alias(tail))
        {
            return Ok((product, observation_type));
        }
    }

    Err(SchemaError::Vocabulary(UnknownTerm {
        vocabulary: "product",
        token: name.to_string(),
    }))
}

fn is_flag_list(text: &str) -> bool {
    !text.is_empty()
        && text
            .split(',')
            .all(|flag| !flag.trim().is_empty() && flag.trim().chars().all(|c| c.is_ascii_digit()))
}

/// Interpret origin QC text for a source class
pub fn parse_quality(class: SourceClass, qc: Option<&str>) -> SchemaResult<QualityFlag> {
    let text = match qc.map(str::trim) {
        None | Some("") => return Ok(QualityFlag::NotEvaluated),
        Some(text) => text,
    };

    if class == SourceClass::FixedStation {
        if is_flag_list(text) {
            let raised = text.split(',').any(|flag| flag.trim().trim_start_matches('0') != "");
            return Ok(if raised {
                QualityFlag::Suspect
            } else {
                QualityFlag::Good
            });
        }
        match text.to_ascii_lowercase().as_str() {
            "v" | "verified" => return Ok(QualityFlag::Good),
            "p" | "preliminary" => return Ok(QualityFlag::NotEvaluated),
            _ => {}
        }
    }

    Ok(text.parse::<QualityFlag>()?)
}

/// Numeric value of an origin field; `None` when the origin left it empty
pub fn parse_value(parameter: &str, value: &Value) -> SchemaResult<Option<f64>> {
    let invalid = |reason: &str| SchemaError::InvalidValue {
        parameter: parameter.to_string(),
        reason: reason.to_string(),
    };
    let number = match value {
        Value::Null => return Ok(None),
        Value::Number(n) => n.as_f64().ok_or_else(|| invalid("not representable"))?,
        Value::String(s) if s.trim().is_empty() => return Ok(None),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| invalid("not a number"))?,
        _ => return Err(invalid("not a scalar")),
    };
    if !number.is_finite() {
        return Err(invalid("not finite"));
    }
    Ok(Some(number))
}

fn coordinate(value: Option<&Value>, axis: &'static str) -> SchemaResult<f64> {
    let value = value.ok_or(SchemaError::MissingField(axis))?;
    parse_value(axis, value)?.ok_or(SchemaError::MissingField(axis))
}

fn parse_position(reading: &RawReading) -> SchemaResult<GeoPoint> {
    let lat = coordinate(reading.lat.as_ref(), "lat")?;
    let lon = wrap_longitude(coordinate(reading.lon.as_ref(), "lon")?);
    if !valid_latitude(lat) {
        return Err(SchemaError::InvalidCoordinate { axis: "lat", value: lat });
    }
    if !valid_longitude(lon) {
        return Err(SchemaError::InvalidCoordinate { axis: "lon", value: lon });
    }
    Ok(GeoPoint::new(lat, lon))
}

/// Distinct sensor ids in a batch of readings, in first-seen order
pub fn sensor_ids(readings: &[RawReading]) -> Vec<SensorId> {
    let mut seen = HashSet::new();
    readings
        .iter()
        .filter(|r| seen.insert(r.sensor_id.as_str()))
        .map(|r| SensorId::from(r.sensor_id.as_str()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use seaguard_core::Sensor;
    use serde_json::json;

    fn normalizer() -> Normalizer {
        let registry = SensorRegistry::from_sensors([
            Sensor::fixed("8454000", 41.807, -71.401),
            Sensor::mobile("bog-133"),
        ])
        .unwrap();
        Normalizer::new(Arc::new(registry))
    }

    #[test]
    fn test_parse_datetime_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 12, 6, 0).unwrap();
        assert_eq!(parse_datetime("2024-03-01 12:06").unwrap(), expected);
        assert_eq!(parse_datetime("2024-03-01T12:06:00Z").unwrap(), expected);
        assert_eq!(parse_datetime("2024-03-01T12:06:00.000Z").unwrap(), expected);
        assert_eq!(parse_datetime("2024-03-01T14:06:00+02:00").unwrap(), expected);
        assert_eq!(
            parse_datetime("2024-03-01").unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
        );
        assert!(parse_datetime("03/01/2024").is_err());
    }

    #[test]
    fn test_parse_parameter() {
        assert_eq!(
            parse_parameter("water_temperature").unwrap(),
            (Product::WaterTemperature, ObservationType::Observed)
        );
        assert_eq!(
            parse_parameter("wlp").unwrap(),
            (Product::WaterLevel, ObservationType::Predicted)
        );
        assert_eq!(
            parse_parameter("wind_speed_q1").unwrap(),
            (Product::WindSpeed, ObservationType::Q1)
        );
        assert_eq!(
            parse_parameter("water_level_prediction").unwrap(),
            (Product::WaterLevel, ObservationType::Predicted)
        );
        assert_eq!(
            parse_parameter("currents_predictions_velocity_major").unwrap(),
            (Product::CurrentVelocityMajor, ObservationType::Predicted)
        );
        assert_eq!(
            parse_parameter("sst").unwrap(),
            (Product::SeaSurfaceTemperature, ObservationType::Observed)
        );
        assert!(matches!(
            parse_parameter("wave_height"),
            Err(SchemaError::Vocabulary(_))
        ));
    }

    #[test]
    fn test_parse_quality_by_class() {
        use SourceClass::*;
        assert_eq!(parse_quality(FixedStation, None).unwrap(), QualityFlag::NotEvaluated);
        assert_eq!(parse_quality(FixedStation, Some("0,0,0,0")).unwrap(), QualityFlag::Good);
        assert_eq!(parse_quality(FixedStation, Some("0,1,0,0")).unwrap(), QualityFlag::Suspect);
        assert_eq!(parse_quality(FixedStation, Some("v")).unwrap(), QualityFlag::Good);
        assert_eq!(parse_quality(MobileUnit, Some("suspect")).unwrap(), QualityFlag::Suspect);
        assert_eq!(parse_quality(WideArea, Some(" ")).unwrap(), QualityFlag::NotEvaluated);
        assert!(parse_quality(MobileUnit, Some("0,0,0")).is_err());
        assert!(parse_quality(WideArea, Some("meh")).is_err());
    }

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value("x", &json!(1.5)).unwrap(), Some(1.5));
        assert_eq!(parse_value("x", &json!(" 2.25 ")).unwrap(), Some(2.25));
        assert_eq!(parse_value("x", &json!("")).unwrap(), None);
        assert_eq!(parse_value("x", &Value::Null).unwrap(), None);
        assert!(parse_value("x", &json!("NaN")).is_err());
        assert!(parse_value("x", &json!("abc")).is_err());
        assert!(parse_value("x", &json!([1.0])).is_err());
    }

    #[test]
    fn test_water_temperature_without_qc_defaults() {
        let reading = RawReading::new("8454000", "2024-03-01 12:06")
            .with_field(RawField::number("water_temperature", 14.2));
        let record = normalizer()
            .normalize_one(SourceClass::FixedStation, &reading)
            .unwrap();

        assert_eq!(record.event.lat, None);
        assert_eq!(record.measurements.len(), 1);
        let m = record.measurements[0];
        assert_eq!(m.product, Product::WaterTemperature);
        assert_eq!(m.value, 14.2);
        assert_eq!(m.quality, QualityFlag::NotEvaluated);
        assert_eq!(m.observation_type, ObservationType::Observed);
    }

    #[test]
    fn test_unknown_product_rejected_not_coerced() {
        let reading = RawReading::new("8454000", "2024-03-01 12:06")
            .with_field(RawField::number("water_temperature", 6.4))
            .with_field(RawField::number("turbidity", 3.0));
        let err = normalizer()
            .normalize_one(SourceClass::FixedStation, &reading)
            .unwrap_err();
        assert!(matches!(err, SchemaError::Vocabulary(_)));
    }

    #[test]
    fn test_fixed_station_must_be_registered() {
        let reading = RawReading::new("9999999", "2024-03-01 12:06")
            .with_field(RawField::number("water_level", 1.0));
        assert_eq!(
            normalizer().normalize_one(SourceClass::FixedStation, &reading).unwrap_err(),
            SchemaError::UnknownSensor("9999999".into())
        );
    }

    #[test]
    fn test_mobile_reading_requires_coordinates() {
        let missing = RawReading::new("bog-133", "2024-03-01T12:00:00Z")
            .with_field(RawField::number("depth", 40.0));
        assert_eq!(
            normalizer().normalize_one(SourceClass::MobileUnit, &missing).unwrap_err(),
            SchemaError::MissingField("lat")
        );

        let located = missing.clone().at(43.6, -70.2);
        let record = normalizer()
            .normalize_one(SourceClass::MobileUnit, &located)
            .unwrap();
        assert_eq!(record.event.position(), Some(GeoPoint::new(43.6, -70.2)));
    }

    #[test]
    fn test_wide_area_longitude_wrapped_and_checked() {
        let reading = RawReading::new("41.125_290.125", "2024-03-01T12:00:00Z")
            .at(41.125, 290.125)
            .with_field(RawField::number("sst", 5.5));
        let record = normalizer()
            .normalize_one(SourceClass::WideArea, &reading)
            .unwrap();
        assert_eq!(record.event.lon, Some(-69.875));

        let bad = reading.clone().at(95.0, 10.0);
        assert!(matches!(
            normalizer().normalize_one(SourceClass::WideArea, &bad),
            Err(SchemaError::InvalidCoordinate { axis: "lat", .. })
        ));
    }

    #[test]
    fn test_class_mismatch_rejected() {
        let reading = RawReading::new("8454000", "2024-03-01T12:00:00Z")
            .at(41.8, -71.4)
            .with_field(RawField::number("depth", 3.0));
        assert!(matches!(
            normalizer().normalize_one(SourceClass::MobileUnit, &reading),
            Err(SchemaError::SourceClassMismatch { .. })
        ));
    }

    #[test]
    fn test_empty_values_skipped_and_empty_reading_rejected() {
        let reading = RawReading::new("8454000", "2024-03-01 12:06")
            .with_field(RawField::new("water_level", json!("")))
            .with_field(RawField::number("air_temperature", 3.1));
        let record = normalizer()
            .normalize_one(SourceClass::FixedStation, &reading)
            .unwrap();
        assert_eq!(record.measurements.len(), 1);

        let empty = RawReading::new("8454000", "2024-03-01 12:06")
            .with_field(RawField::new("water_level", Value::Null));
        assert_eq!(
            normalizer().normalize_one(SourceClass::FixedStation, &empty).unwrap_err(),
            SchemaError::EmptyReading("8454000".into())
        );
    }

    #[test]
    fn test_batch_counts_and_determinism() {
        let readings = vec![
            RawReading::new("8454000", "2024-03-01 12:00")
                .with_field(RawField::number("water_level", 1.0).with_qc("0,0,0,0")),
            RawReading::new("8454000", "not a date")
                .with_field(RawField::number("water_level", 1.0)),
            RawReading::new("8454000", "2024-03-01 12:06")
                .with_field(RawField::number("water_level", 1.1).with_qc("0,0,1,0")),
        ];
        let normalizer = normalizer();
        let (records, report) = normalizer.normalize_counted(SourceClass::FixedStation, &readings);
        assert_eq!(report, NormalizeReport { accepted: 2, rejected: 1 });
        assert_eq!(records[0].measurements[0].quality, QualityFlag::Good);
        assert_eq!(records[1].measurements[0].quality, QualityFlag::Suspect);

        let (again, _) = normalizer.normalize_counted(SourceClass::FixedStation, &readings);
        assert_eq!(records, again);
    }

    #[test]
    fn test_sensor_ids_first_seen_order() {
        let readings = vec![
            RawReading::new("b", "2024-01-01"),
            RawReading::new("a", "2024-01-01"),
            RawReading::new("b", "2024-01-02"),
        ];
        assert_eq!(sensor_ids(&readings), vec![SensorId::from("b"), SensorId::from("a")]);
    }
}
