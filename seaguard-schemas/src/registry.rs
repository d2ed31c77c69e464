//! Static Sensor Registry
//!
//! Holds the sensor records the normalizer needs to resolve identity and,
//! for fixed stations, location. The registry is shared between the job and
//! the normalizer behind an `Arc`, so all access goes through an `RwLock`.

use std::collections::HashMap;
use std::sync::RwLock;

use seaguard_core::{GeoPoint, Sensor, SensorId, SourceClass};

use crate::{SchemaError, SchemaResult};

/// Thread-safe sensor registry keyed by sensor id
#[derive(Debug, Default)]
pub struct SensorRegistry {
    sensors: RwLock<HashMap<SensorId, Sensor>>,
}

impl SensorRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with `sensors`
    pub fn from_sensors(sensors: impl IntoIterator<Item = Sensor>) -> SchemaResult<Self> {
        let registry = Self::new();
        for sensor in sensors {
            registry.register(sensor)?;
        }
        Ok(registry)
    }

    /// Register a sensor
    ///
    /// Identity is stable across runs: registering an identical record again
    /// is a no-op, registering a different record under a known id fails.
    pub fn register(&self, sensor: Sensor) -> SchemaResult<()> {
        let mut sensors = self.sensors.write().map_err(|_| SchemaError::LockPoisoned)?;

        match sensors.get(&sensor.id) {
            Some(existing) if existing.kind == sensor.kind => Ok(()),
            Some(_) => Err(SchemaError::ConflictingSensor(sensor.id.to_string())),
            None => {
                log::debug!("registered {} sensor {}", sensor.source_class(), sensor.id);
                sensors.insert(sensor.id.clone(), sensor);
                Ok(())
            }
        }
    }

    /// Get a sensor by id
    pub fn get(&self, id: &SensorId) -> SchemaResult<Option<Sensor>> {
        let sensors = self.sensors.read().map_err(|_| SchemaError::LockPoisoned)?;
        Ok(sensors.get(id).cloned())
    }

    /// Static location of a fixed station
    pub fn location_of(&self, id: &SensorId) -> SchemaResult<GeoPoint> {
        let sensor = self
            .get(id)?
            .ok_or_else(|| SchemaError::UnknownSensor(id.to_string()))?;

        match sensor.static_location() {
            Some(point) => Ok(point),
            None => Err(SchemaError::SourceClassMismatch {
                sensor_id: id.to_string(),
                registered: sensor.source_class(),
                claimed: SourceClass::FixedStation,
            }),
        }
    }

    /// Ids of every registered sensor of `class`, sorted
    pub fn ids_of_class(&self, class: SourceClass) -> SchemaResult<Vec<SensorId>> {
        let sensors = self.sensors.read().map_err(|_| SchemaError::LockPoisoned)?;
        let mut ids: Vec<_> = sensors
            .values()
            .filter(|s| s.source_class() == class)
            .map(|s| s.id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    pub fn len(&self) -> usize {
        self.sensors.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
