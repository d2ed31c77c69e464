//! Model targets
//!
//! A target names what an artifact predicts. Forecast targets list the
//! products they output; the anomaly target scores whole events instead.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::vocab::{Product, UnknownTerm};

/// What a trained model predicts
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTarget {
    /// Next (latitude, longitude) of a mobile unit
    Location,
    Depth,
    BatteryTemperature,
    /// Isolation-forest outlier scorer
    Anomaly,
}

impl ModelTarget {
    pub const ALL: [ModelTarget; 4] = [
        ModelTarget::Location,
        ModelTarget::Depth,
        ModelTarget::BatteryTemperature,
        ModelTarget::Anomaly,
    ];

    pub const FORECASTS: [ModelTarget; 3] = [
        ModelTarget::Location,
        ModelTarget::Depth,
        ModelTarget::BatteryTemperature,
    ];

    pub const fn name(&self) -> &'static str {
        match self {
            ModelTarget::Location => "location",
            ModelTarget::Depth => "depth",
            ModelTarget::BatteryTemperature => "battery_temperature",
            ModelTarget::Anomaly => "anomaly",
        }
    }

    /// Products predicted by the target, in output order
    pub fn outputs(&self) -> &'static [Product] {
        match self {
            ModelTarget::Location => &[Product::Latitude, Product::Longitude],
            ModelTarget::Depth => &[Product::Depth],
            ModelTarget::BatteryTemperature => &[Product::BatteryTemperature],
            ModelTarget::Anomaly => &[],
        }
    }

    pub fn is_forecast(&self) -> bool {
        !self.outputs().is_empty()
    }
}

impl fmt::Display for ModelTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ModelTarget {
    type Err = UnknownTerm;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let token = s.trim();
        ModelTarget::ALL
            .iter()
            .copied()
            .find(|t| t.name().eq_ignore_ascii_case(token))
            .ok_or_else(|| UnknownTerm {
                vocabulary: "model target",
                token: s.to_string(),
            })
    }
}
