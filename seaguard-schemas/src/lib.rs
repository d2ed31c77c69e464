//! Canonical Normalization and Boundary Schemas
//!
//! ## Overview
//!
//! Source adapters hand over readings in the shape their origin uses: origin
//! parameter names, origin time formats, origin QC encodings. This crate is
//! the single place where those shapes become canonical records.
//!
//! ```text
//! RawReading (origin shape) ──► Normalizer ──► CanonicalRecord
//!                                   │
//!                                   ├── SensorRegistry (static station locations)
//!                                   └── vocabularies (product / type / quality)
//! ```
//!
//! ## Normalization Rules
//!
//! 1. **Closed vocabularies**: an origin parameter must map to a known
//!    product. Unknown parameters are rejected, never coerced.
//! 2. **Location by source class**: fixed stations resolve their location
//!    from the registry; mobile and wide-area readings must carry coordinates.
//! 3. **Defaults**: no QC from the origin means `na`, no observation type
//!    means `observed`.
//! 4. **Per-reading failure**: every reading yields its own `Result`, so one
//!    bad reading never discards a batch.
//!
//! ## Boundary Schema
//!
//! The Avro schema `canonical_record_v1` mirrors the canonical model with the
//! vocabularies encoded as Avro enums. [`encode_record`] and
//! [`decode_record`] produce and consume schemaless datums for the storage
//! collaborator.
//!
//! ## Usage Example
//!
//! ```rust
//! use std::sync::Arc;
//! use seaguard_core::{Product, QualityFlag, Sensor, SourceClass};
//! use seaguard_schemas::{Normalizer, RawField, RawReading, SensorRegistry};
//!
//! let registry = Arc::new(SensorRegistry::new());
//! registry.register(Sensor::fixed("8454000", 41.807, -71.401))?;
//!
//! let normalizer = Normalizer::new(registry);
//! let reading = RawReading::new("8454000", "2024-03-01 12:06")
//!     .with_field(RawField::number("water_temperature", 6.4));
//!
//! let record = normalizer.normalize_one(SourceClass::FixedStation, &reading)?;
//! assert_eq!(record.measurements[0].product, Product::WaterTemperature);
//! assert_eq!(record.measurements[0].quality, QualityFlag::NotEvaluated);
//! # Ok::<(), seaguard_schemas::SchemaError>(())
//! ```

#![deny(unsafe_code)]

use seaguard_core::{PipelineError, SourceClass, UnknownTerm};
use thiserror::Error;

pub mod registry;
pub mod schemas;
pub mod validation;

pub use registry::SensorRegistry;
pub use schemas::{
    canonical_record_v1, decode_record, encode_record, validate_record, CANONICAL_RECORD_V1,
};
pub use validation::{
    parse_datetime, parse_parameter, parse_quality, Normalizer, NormalizeReport, RawField,
    RawReading,
};

/// Result type for normalization and schema operations
pub type SchemaResult<T> = Result<T, SchemaError>;

/// Normalization and schema errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchemaError {
    #[error(transparent)]
    Vocabulary(#[from] UnknownTerm),

    #[error("unparseable datetime '{0}'")]
    InvalidDatetime(String),

    #[error("{axis} {value} outside valid range")]
    InvalidCoordinate {
        axis: &'static str,
        value: f64,
    },

    #[error("required field '{0}' is missing")]
    MissingField(&'static str),

    #[error("invalid value for '{parameter}': {reason}")]
    InvalidValue {
        parameter: String,
        reason: String,
    },

    #[error("sensor '{0}' is not in the registry")]
    UnknownSensor(String),

    #[error("sensor '{sensor_id}' is registered as {registered}, reading claims {claimed}")]
    SourceClassMismatch {
        sensor_id: String,
        registered: SourceClass,
        claimed: SourceClass,
    },

    #[error("sensor '{0}' already registered with a different definition")]
    ConflictingSensor(String),

    #[error("reading for '{0}' has no measurements")]
    EmptyReading(String),

    #[error("avro: {0}")]
    Avro(String),

    #[error("sensor registry lock poisoned")]
    LockPoisoned,
}

impl From<SchemaError> for PipelineError {
    fn from(err: SchemaError) -> Self {
        PipelineError::SchemaViolation {
            reason: err.to_string(),
        }
    }
}

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
