//! Canonical Measurement Model
//!
//! ## Overview
//!
//! Every origin, whatever its wire shape, ends up expressed in the types of
//! this module. A [`CanonicalRecord`] pairs one [`MeasurementEvent`] (a single
//! observation instant of a single sensor) with the [`Measurement`]s taken at
//! that instant.
//!
//! ```text
//! CanonicalRecord
//! ├── event: MeasurementEvent { datetime, sensor_id, lat?, lon? }
//! └── measurements: [Measurement { product, value, type, quality }, ...]
//! ```
//!
//! ## Location Rule
//!
//! Fixed-station sensors never store coordinates per event; their location
//! lives on the static [`Sensor`] record and is resolved on demand. Mobile
//! units and wide-area sources carry coordinates on every event, and a
//! record from those classes without coordinates cannot be constructed by
//! the normalizer.
//!
//! ## Lifecycle
//!
//! Records are write-once. A correction is a new record with an updated
//! quality flag, never an in-place edit, so none of these types expose
//! mutating helpers beyond construction.
//!
//! ## Outputs
//!
//! [`AnomalyScore`] and [`ForecastRecord`] are the result-set side of the
//! boundary. Both name the artifact version that produced them.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geo::GeoPoint;
use crate::target::ModelTarget;
use crate::vocab::{ObservationType, Product, QualityFlag, SourceClass};

/// Stable identity of a sensor across runs
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SensorId(String);

impl SensorId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SensorId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for SensorId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Source-class specific part of a sensor's identity
///
/// Exactly one variant applies to any sensor. Only fixed stations hold a
/// static location.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "class", rename_all = "snake_case")]
pub enum SensorKind {
    FixedStation {
        /// Surveyed station latitude in degrees
        lat: f64,
        /// Surveyed station longitude in degrees
        lon: f64,
    },
    MobileUnit,
    WideArea,
}

/// A measurement source known to the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sensor {
    pub id: SensorId,
    /// Human-readable label, when the origin supplies one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub kind: SensorKind,
}

impl Sensor {
    /// A fixed station at a surveyed location
    pub fn fixed(id: impl Into<SensorId>, lat: f64, lon: f64) -> Self {
        Self {
            id: id.into(),
            name: None,
            kind: SensorKind::FixedStation { lat, lon },
        }
    }

    /// A mobile unit reporting its own position
    pub fn mobile(id: impl Into<SensorId>) -> Self {
        Self {
            id: id.into(),
            name: None,
            kind: SensorKind::MobileUnit,
        }
    }

    /// A cell of a wide-area product
    pub fn wide_area(id: impl Into<SensorId>) -> Self {
        Self {
            id: id.into(),
            name: None,
            kind: SensorKind::WideArea,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn source_class(&self) -> SourceClass {
        match self.kind {
            SensorKind::FixedStation { .. } => SourceClass::FixedStation,
            SensorKind::MobileUnit => SourceClass::MobileUnit,
            SensorKind::WideArea => SourceClass::WideArea,
        }
    }

    /// Location stored on the sensor record (fixed stations only)
    pub fn static_location(&self) -> Option<GeoPoint> {
        match self.kind {
            SensorKind::FixedStation { lat, lon } => Some(GeoPoint::new(lat, lon)),
            _ => None,
        }
    }
}

/// One observation instant from one sensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementEvent {
    /// UTC observation time
    pub datetime: DateTime<Utc>,
    pub sensor_id: SensorId,
    /// Per-event latitude; absent for fixed stations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    /// Per-event longitude; absent for fixed stations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lon: Option<f64>,
}

impl MeasurementEvent {
    /// Event without per-event coordinates
    pub fn at_station(sensor_id: impl Into<SensorId>, datetime: DateTime<Utc>) -> Self {
        Self {
            datetime,
            sensor_id: sensor_id.into(),
            lat: None,
            lon: None,
        }
    }

    /// Event carrying its own position
    pub fn located(sensor_id: impl Into<SensorId>, datetime: DateTime<Utc>, point: GeoPoint) -> Self {
        Self {
            datetime,
            sensor_id: sensor_id.into(),
            lat: Some(point.lat),
            lon: Some(point.lon),
        }
    }

    /// Per-event position, if both coordinates are present
    pub fn position(&self) -> Option<GeoPoint> {
        match (self.lat, self.lon) {
            (Some(lat), Some(lon)) => Some(GeoPoint::new(lat, lon)),
            _ => None,
        }
    }
}

/// One product reading tied to an event
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub product: Product,
    pub value: f64,
    #[serde(rename = "type", default)]
    pub observation_type: ObservationType,
    #[serde(default)]
    pub quality: QualityFlag,
}

impl Measurement {
    /// Observed reading with no QC information
    pub fn observed(product: Product, value: f64) -> Self {
        Self {
            product,
            value,
            observation_type: ObservationType::Observed,
            quality: QualityFlag::NotEvaluated,
        }
    }

    pub fn with_quality(mut self, quality: QualityFlag) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_type(mut self, observation_type: ObservationType) -> Self {
        self.observation_type = observation_type;
        self
    }
}

/// Event plus the measurements taken at it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub event: MeasurementEvent,
    pub measurements: Vec<Measurement>,
}

impl CanonicalRecord {
    pub fn new(event: MeasurementEvent, measurements: Vec<Measurement>) -> Self {
        Self { event, measurements }
    }

    pub fn sensor_id(&self) -> &SensorId {
        &self.event.sensor_id
    }

    pub fn datetime(&self) -> DateTime<Utc> {
        self.event.datetime
    }

    /// Value of the first usable reading of `product`
    ///
    /// Observed readings win over other observation types. Readings flagged
    /// bad are ignored.
    pub fn value_of(&self, product: Product) -> Option<f64> {
        let usable = |m: &&Measurement| m.product == product && m.quality != QualityFlag::Bad;
        self.measurements
            .iter()
            .filter(usable)
            .find(|m| m.observation_type == ObservationType::Observed)
            .or_else(|| self.measurements.iter().find(usable))
            .map(|m| m.value)
    }

    /// Position of the event, falling back to latitude/longitude products
    pub fn position(&self) -> Option<GeoPoint> {
        self.event.position().or_else(|| {
            let lat = self.value_of(Product::Latitude)?;
            let lon = self.value_of(Product::Longitude)?;
            Some(GeoPoint::new(lat, lon))
        })
    }

    /// Value of a target output, treating coordinates as products
    pub fn output_value(&self, product: Product) -> Option<f64> {
        match product {
            Product::Latitude => self.position().map(|p| p.lat),
            Product::Longitude => self.position().map(|p| p.lon),
            other => self.value_of(other),
        }
    }
}

/// Outlier score for one event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyScore {
    pub sensor_id: SensorId,
    /// Datetime of the scored event
    pub datetime: DateTime<Utc>,
    /// Score in [0, 1]; higher is more anomalous
    pub score: f64,
    /// Version of the scorer artifact
    pub model_version: u32,
}

/// One predicted future reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastRecord {
    pub sensor_id: SensorId,
    /// Time the prediction applies to
    pub timestamp: DateTime<Utc>,
    pub target: ModelTarget,
    /// Predicted value per output product
    pub values: BTreeMap<Product, f64>,
    /// Version of the producing artifact
    pub model_version: u32,
}
