//! Canonical data model for SeaGuard
//!
//! Everything downstream of the source adapters speaks the types defined
//! here: sensor identity, the canonical measurement record, the closed
//! measurement vocabularies, model targets, geodesy, and the shared error
//! taxonomy.
//!
//! ```rust
//! use chrono::{TimeZone, Utc};
//! use seaguard_core::{CanonicalRecord, Measurement, MeasurementEvent, Product};
//!
//! let when = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
//! let record = CanonicalRecord::new(
//!     MeasurementEvent::at_station("8454000", when),
//!     vec![Measurement::observed(Product::WaterTemperature, 17.3)],
//! );
//! assert_eq!(record.value_of(Product::WaterTemperature), Some(17.3));
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod events;
pub mod geo;
pub mod target;
pub mod time;
pub mod vocab;

pub use errors::{ErrorKind, PipelineError, PipelineResult};
pub use events::{
    AnomalyScore, CanonicalRecord, ForecastRecord, Measurement, MeasurementEvent, Sensor,
    SensorId, SensorKind,
};
pub use geo::{haversine_km, GeoPoint, EARTH_RADIUS_KM};
pub use target::ModelTarget;
pub use time::{FixedTime, SystemClock, TimeSource, TimeWindow};
pub use vocab::{ObservationType, Product, QualityFlag, SourceClass, UnknownTerm};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
