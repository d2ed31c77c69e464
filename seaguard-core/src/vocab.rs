//! Fixed Measurement Vocabularies
//!
//! Every canonical measurement carries three tags drawn from closed sets:
//! the measured product, the observation type, and the quality flag. The sets
//! are Rust enums so that a value outside the vocabulary cannot exist past the
//! normalization boundary; parsing is the only way in, and parsing rejects
//! anything unknown.
//!
//! Each variant has a canonical snake_case name (used in JSON and logs) and a
//! short storage code inherited from the measurement tables of the storage
//! collaborator. Both are accepted when parsing.
//!
//! ```rust
//! use seaguard_core::vocab::{Product, QualityFlag};
//!
//! assert_eq!("water_temperature".parse::<Product>().unwrap(), Product::WaterTemperature);
//! assert_eq!("wt".parse::<Product>().unwrap(), Product::WaterTemperature);
//! assert!("sea_serpent_count".parse::<Product>().is_err());
//! assert_eq!(QualityFlag::default(), QualityFlag::NotEvaluated);
//! ```

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Error returned when a token is outside one of the fixed vocabularies
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("'{token}' is not a known {vocabulary}")]
pub struct UnknownTerm {
    /// Which vocabulary rejected the token
    pub vocabulary: &'static str,
    /// The rejected token as received
    pub token: String,
}

impl UnknownTerm {
    fn new(vocabulary: &'static str, token: &str) -> Self {
        Self {
            vocabulary,
            token: token.to_string(),
        }
    }
}

macro_rules! vocabulary {
    (
        $(#[$meta:meta])*
        $name:ident, $label:literal {
            $( $(#[$vmeta:meta])* $variant:ident => ($canonical:literal, $code:literal) ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub enum $name {
            $( $(#[$vmeta])* $variant, )+
        }

        impl $name {
            /// Every member of the vocabulary, in declaration order
            pub const ALL: &'static [$name] = &[ $( $name::$variant, )+ ];

            /// Canonical snake_case name
            pub const fn name(&self) -> &'static str {
                match self {
                    $( $name::$variant => $canonical, )+
                }
            }

            /// Short storage code
            pub const fn code(&self) -> &'static str {
                match self {
                    $( $name::$variant => $code, )+
                }
            }

            /// Position of the variant in [`Self::ALL`]
            pub fn index(&self) -> usize {
                *self as usize
            }

            /// Look up a token by canonical name or storage code
            pub fn lookup(token: &str) -> Option<Self> {
                let token = token.trim();
                Self::ALL.iter().copied().find(|term| {
                    term.name().eq_ignore_ascii_case(token) || term.code().eq_ignore_ascii_case(token)
                })
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.name())
            }
        }

        impl FromStr for $name {
            type Err = UnknownTerm;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::lookup(s).ok_or_else(|| UnknownTerm::new($label, s))
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.name())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let token = String::deserialize(deserializer)?;
                token.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

vocabulary! {
    /// Measured parameter
    Product, "product" {
        WaterLevel => ("water_level", "wl"),
        AirTemperature => ("air_temperature", "at"),
        WaterTemperature => ("water_temperature", "wt"),
        BatteryTemperature => ("battery_temperature", "bt"),
        WindSpeed => ("wind_speed", "ws"),
        WindDirection => ("wind_direction", "wd"),
        WindGustSpeed => ("wind_gust_speed", "wgs"),
        CurrentSpeed => ("current_speed", "cs"),
        CurrentDirection => ("current_direction", "cd"),
        BuoySpeed => ("buoy_speed", "bs"),
        BuoyDirection => ("buoy_direction", "bd"),
        Tide => ("tide", "t"),
        CurrentBin => ("current_bin", "cb"),
        CurrentFloodDirection => ("current_flood_direction", "cfd"),
        CurrentEbbDirection => ("current_ebb_direction", "ced"),
        CurrentDepth => ("current_depth", "cdpth"),
        CurrentVelocityMajor => ("current_velocity_major", "cvm"),
        Depth => ("depth", "depth"),
        PreviousLatitude => ("previous_latitude", "plat"),
        PreviousLongitude => ("previous_longitude", "plon"),
        Acceleration => ("acceleration", "a"),
        UcTemperature => ("uc_temperature", "uct"),
        PositionDelta => ("position_delta", "pd"),
        IcePercent => ("ice_percent", "ice"),
        SstError => ("sst_error", "err"),
        SstAnomaly => ("sst_anomaly", "anom"),
        SeaSurfaceTemperature => ("sea_surface_temperature", "sst"),
        WaterPressure => ("water_pressure", "wp"),
        Salinity => ("salinity", "sl"),
        ZonalCurrent => ("zonal_current", "zc"),
        MeridionalCurrent => ("meridional_current", "mc"),
        /// Position fixes reported as products by mobile units
        Latitude => ("latitude", "lat"),
        Longitude => ("longitude", "lon"),
    }
}

vocabulary! {
    /// How a value came to be
    ///
    /// Quartiles and mean describe aggregated readings, predicted and
    /// interpolated describe values that were not directly measured.
    ObservationType, "observation type" {
        Observed => ("observed", "r"),
        Predicted => ("predicted", "pr"),
        Q1 => ("q1", "q1"),
        Q2 => ("q2", "q2"),
        Q3 => ("q3", "q3"),
        Mean => ("mean", "m"),
        Interpolated => ("interpolated", "in"),
    }
}

vocabulary! {
    /// QC/QA flag according to the source
    QualityFlag, "quality flag" {
        Good => ("good", "g"),
        Bad => ("bad", "b"),
        Suspect => ("suspect", "s"),
        /// Not evaluated or unknown
        NotEvaluated => ("na", "na"),
    }
}

vocabulary! {
    /// Source class of a sensor, determining how location is resolved
    SourceClass, "source class" {
        /// Tide gauges and moored stations with a static location
        FixedStation => ("fixed_station", "stationary"),
        /// Buoys and drifters that report their own position
        MobileUnit => ("mobile_unit", "mobile"),
        /// Gridded remote-sensing products covering an area
        WideArea => ("wide_area", "omnipresent"),
    }
}

impl ObservationType {
    /// Parse the long-form aliases some origins use in parameter names
    pub fn from_alias(token: &str) -> Option<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "raw" | "observation" => Some(Self::Observed),
            "prediction" | "predictions" | "forecast" => Some(Self::Predicted),
            "interpolation" => Some(Self::Interpolated),
            "average" => Some(Self::Mean),
            other => Self::lookup(other),
        }
    }
}

impl Default for ObservationType {
    fn default() -> Self {
        ObservationType::Observed
    }
}

impl Default for QualityFlag {
    fn default() -> Self {
        QualityFlag::NotEvaluated
    }
}

impl SourceClass {
    /// Whether events of this class carry their own coordinates
    pub const fn locates_per_event(&self) -> bool {
        !matches!(self, SourceClass::FixedStation)
    }
}
