//! Avro boundary schema for canonical records
//!
//! `canonical_record_v1` is the storage-boundary representation of a
//! [`CanonicalRecord`]. The closed vocabularies become Avro enums, so a
//! datum carrying an unknown product cannot be written or read.

use apache_avro::types::Value;
use apache_avro::{from_avro_datum, to_avro_datum, Schema};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;

use seaguard_core::{
    CanonicalRecord, Measurement, MeasurementEvent, ObservationType, Product, QualityFlag,
    SensorId,
};

use crate::{SchemaError, SchemaResult};

/// Qualified name under which the schema is registered
pub const CANONICAL_RECORD_V1: &str = "canonical_record_v1";

lazy_static::lazy_static! {
    static ref CANONICAL_SCHEMA: Result<Schema, String> =
        canonical_record_v1().map_err(|e| e.to_string());
}

fn symbols<T: Copy>(all: &[T], name: fn(&T) -> &'static str) -> Vec<&'static str> {
    all.iter().map(name).collect()
}

/// Canonical record schema v1
pub fn canonical_record_v1() -> SchemaResult<Schema> {
    let schema_json = json!({
        "namespace": "io.seaguard.canonical.v1",
        "type": "record",
        "name": "CanonicalRecord",
        "doc": "One observation instant of one sensor with its measurements",
        "fields": [
            {
                "name": "datetime",
                "type": {"type": "long", "logicalType": "timestamp-micros"},
                "doc": "UTC observation time"
            },
            {
                "name": "sensor_id",
                "type": "string"
            },
            {
                "name": "lat",
                "type": ["null", "double"],
                "default": null,
                "doc": "Per-event latitude; null for fixed stations"
            },
            {
                "name": "lon",
                "type": ["null", "double"],
                "default": null,
                "doc": "Per-event longitude; null for fixed stations"
            },
            {
                "name": "measurements",
                "type": {
                    "type": "array",
                    "items": {
                        "type": "record",
                        "name": "Measurement",
                        "fields": [
                            {
                                "name": "product",
                                "type": {
                                    "type": "enum",
                                    "name": "Product",
                                    "symbols": symbols(Product::ALL, Product::name)
                                }
                            },
                            {"name": "value", "type": "double"},
                            {
                                "name": "type",
                                "type": {
                                    "type": "enum",
                                    "name": "ObservationType",
                                    "symbols": symbols(ObservationType::ALL, ObservationType::name)
                                }
                            },
                            {
                                "name": "quality",
                                "type": {
                                    "type": "enum",
                                    "name": "QualityFlag",
                                    "symbols": symbols(QualityFlag::ALL, QualityFlag::name)
                                }
                            }
                        ]
                    }
                }
            }
        ]
    });

    Schema::parse(&schema_json).map_err(|e| SchemaError::Avro(e.to_string()))
}

fn schema() -> SchemaResult<&'static Schema> {
    CANONICAL_SCHEMA
        .as_ref()
        .map_err(|reason| SchemaError::Avro(reason.clone()))
}

fn optional_double(value: Option<f64>) -> Value {
    match value {
        Some(v) => Value::Union(1, Box::new(Value::Double(v))),
        None => Value::Union(0, Box::new(Value::Null)),
    }
}

fn measurement_value(m: &Measurement) -> Value {
    Value::Record(vec![
        (
            "product".to_string(),
            Value::Enum(m.product.index() as u32, m.product.name().to_string()),
        ),
        ("value".to_string(), Value::Double(m.value)),
        (
            "type".to_string(),
            Value::Enum(
                m.observation_type.index() as u32,
                m.observation_type.name().to_string(),
            ),
        ),
        (
            "quality".to_string(),
            Value::Enum(m.quality.index() as u32, m.quality.name().to_string()),
        ),
    ])
}

/// Avro value of a canonical record
pub fn record_value(record: &CanonicalRecord) -> Value {
    Value::Record(vec![
        (
            "datetime".to_string(),
            Value::TimestampMicros(record.event.datetime.timestamp_micros()),
        ),
        (
            "sensor_id".to_string(),
            Value::String(record.event.sensor_id.as_str().to_string()),
        ),
        ("lat".to_string(), optional_double(record.event.lat)),
        ("lon".to_string(), optional_double(record.event.lon)),
        (
            "measurements".to_string(),
            Value::Array(record.measurements.iter().map(measurement_value).collect()),
        ),
    ])
}

/// Check a record against the boundary schema
pub fn validate_record(record: &CanonicalRecord) -> SchemaResult<()> {
    let schema = schema()?;
    if record_value(record).validate(schema) {
        Ok(())
    } else {
        Err(SchemaError::Avro(format!(
            "record for '{}' does not match {}",
            record.event.sensor_id, CANONICAL_RECORD_V1
        )))
    }
}

/// Encode a record as a schemaless Avro datum
pub fn encode_record(record: &CanonicalRecord) -> SchemaResult<Vec<u8>> {
    let schema = schema()?;
    to_avro_datum(schema, record_value(record)).map_err(|e| SchemaError::Avro(e.to_string()))
}

/// Decode a datum written by [`encode_record`]
pub fn decode_record(mut bytes: &[u8]) -> SchemaResult<CanonicalRecord> {
    let schema = schema()?;
    let value =
        from_avro_datum(schema, &mut bytes, None).map_err(|e| SchemaError::Avro(e.to_string()))?;
    record_from_value(value)
}

fn field<'a>(fields: &'a [(String, Value)], name: &'static str) -> SchemaResult<&'a Value> {
    fields
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value)
        .ok_or(SchemaError::MissingField(name))
}

fn as_double(value: &Value, name: &'static str) -> SchemaResult<f64> {
    match value {
        Value::Double(d) => Ok(*d),
        Value::Float(f) => Ok(f64::from(*f)),
        _ => Err(SchemaError::Avro(format!("field '{name}' is not a double"))),
    }
}

fn as_optional_double(value: &Value, name: &'static str) -> SchemaResult<Option<f64>> {
    match value {
        Value::Union(_, inner) => match inner.as_ref() {
            Value::Null => Ok(None),
            other => as_double(other, name).map(Some),
        },
        Value::Null => Ok(None),
        other => as_double(other, name).map(Some),
    }
}

fn as_symbol<'a>(value: &'a Value, name: &'static str) -> SchemaResult<&'a str> {
    match value {
        Value::Enum(_, symbol) | Value::String(symbol) => Ok(symbol.as_str()),
        _ => Err(SchemaError::Avro(format!("field '{name}' is not an enum"))),
    }
}

fn as_datetime(value: &Value) -> SchemaResult<DateTime<Utc>> {
    let micros = match value {
        Value::TimestampMicros(us) | Value::Long(us) => *us,
        _ => return Err(SchemaError::Avro("field 'datetime' is not a timestamp".into())),
    };
    Utc.timestamp_micros(micros)
        .single()
        .ok_or_else(|| SchemaError::InvalidDatetime(micros.to_string()))
}

fn measurement_from_value(value: &Value) -> SchemaResult<Measurement> {
    let Value::Record(fields) = value else {
        return Err(SchemaError::Avro("measurement is not a record".into()));
    };
    Ok(Measurement {
        product: as_symbol(field(fields, "product")?, "product")?.parse()?,
        value: as_double(field(fields, "value")?, "value")?,
        observation_type: as_symbol(field(fields, "type")?, "type")?.parse()?,
        quality: as_symbol(field(fields, "quality")?, "quality")?.parse()?,
    })
}

/// Rebuild a canonical record from its Avro value
pub fn record_from_value(value: Value) -> SchemaResult<CanonicalRecord> {
    let Value::Record(fields) = value else {
        return Err(SchemaError::Avro("expected a record".into()));
    };

    let sensor_id = match field(&fields, "sensor_id")? {
        Value::String(id) => SensorId::new(id.clone()),
        _ => return Err(SchemaError::Avro("field 'sensor_id' is not a string".into())),
    };
    let event = MeasurementEvent {
        datetime: as_datetime(field(&fields, "datetime")?)?,
        sensor_id,
        lat: as_optional_double(field(&fields, "lat")?, "lat")?,
        lon: as_optional_double(field(&fields, "lon")?, "lon")?,
    };

    let measurements = match field(&fields, "measurements")? {
        Value::Array(items) => items
            .iter()
            .map(measurement_from_value)
            .collect::<SchemaResult<Vec<_>>>()?,
        _ => return Err(SchemaError::Avro("field 'measurements' is not an array".into())),
    };

    Ok(CanonicalRecord::new(event, measurements))
}

#[cfg(test)]
mod tests {
    use super::*;
    use seaguard_core::GeoPoint;

    fn mobile_record() -> CanonicalRecord {
        CanonicalRecord::new(
            MeasurementEvent::located(
                "bog-133",
                Utc.with_ymd_and_hms(2023, 8, 14, 6, 30, 0).unwrap(),
                GeoPoint::new(43.61, -70.21),
            ),
            vec![
                Measurement::observed(Product::WaterTemperature, 16.25),
                Measurement::observed(Product::Depth, 41.0).with_quality(QualityFlag::Suspect),
            ],
        )
    }

    #[test]
    fn parse_canonical_record_schema() {
        assert!(canonical_record_v1().is_ok());
    }

    #[test]
    fn encode_then_decode_preserves_record() {
        let record = mobile_record();
        let bytes = encode_record(&record).unwrap();
        assert_eq!(decode_record(&bytes).unwrap(), record);
    }

    #[test]
    fn fixed_station_record_has_null_coordinates() {
        let record = CanonicalRecord::new(
            MeasurementEvent::at_station("8454000", Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap()),
            vec![Measurement::observed(Product::WaterLevel, 1.02)],
        );
        validate_record(&record).unwrap();
        let decoded = decode_record(&encode_record(&record).unwrap()).unwrap();
        assert_eq!(decoded.event.lat, None);
        assert_eq!(decoded.event.lon, None);
    }

    #[test]
    fn enum_symbols_follow_vocabulary_order() {
        let value = record_value(&mobile_record());
        let Value::Record(fields) = value else { panic!("not a record") };
        let Value::Array(items) = &fields[4].1 else { panic!("not an array") };
        let Value::Record(first) = &items[0] else { panic!("not a record") };
        assert_eq!(
            first[0].1,
            Value::Enum(Product::WaterTemperature.index() as u32, "water_temperature".into())
        );
    }

    #[test]
    fn truncated_datum_is_rejected() {
        let bytes = encode_record(&mobile_record()).unwrap();
        assert!(decode_record(&bytes[..bytes.len() / 2]).is_err());
    }
}
