//! Adapter configuration and the closed adapter set
//!
//! Adapters are declared in the job configuration, tagged by `kind`.
//! Credentials never appear in the file; the configuration names the
//! environment variables that hold them.
//!
//! ```toml
//! [[adapters]]
//! kind = "mobile_unit"
//! name = "bog"
//! base_url = "https://api.example.org"
//! username_env = "BOG_API_USERNAME"
//! password_env = "BOG_API_PASSWORD"
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use seaguard_core::SourceClass;
use seaguard_schemas::RawReading;

use crate::fixed::FixedStationAdapter;
use crate::http::Transport;
use crate::mobile::{MobileUnitAdapter, DEFAULT_AUTH_ATTEMPTS};
use crate::wide_area::{GridBounds, WideAreaAdapter};
use crate::{ConnectorError, ConnectorResult, FetchQuery, FetchRaw};

fn default_products() -> Vec<String> {
    vec!["water_level".to_string(), "water_temperature".to_string()]
}

fn default_datum() -> String {
    "MLLW".to_string()
}

fn default_auth_attempts() -> u32 {
    DEFAULT_AUTH_ATTEMPTS
}

fn default_variables() -> Vec<String> {
    ["sst", "anom", "err", "ice"].map(String::from).to_vec()
}

/// Declarative description of one source adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AdapterConfig {
    FixedStation {
        name: String,
        base_url: String,
        /// Stations fetched when a job names no sensors
        #[serde(default)]
        stations: Vec<String>,
        #[serde(default = "default_products")]
        products: Vec<String>,
        #[serde(default = "default_datum")]
        datum: String,
    },
    MobileUnit {
        name: String,
        base_url: String,
        /// Environment variable holding the login name
        username_env: String,
        /// Environment variable holding the password
        password_env: String,
        #[serde(default)]
        series: Vec<String>,
        #[serde(default = "default_auth_attempts")]
        auth_attempts: u32,
    },
    WideArea {
        name: String,
        dataset_url: String,
        bounds: GridBounds,
        #[serde(default = "default_variables")]
        variables: Vec<String>,
    },
}

impl AdapterConfig {
    pub fn name(&self) -> &str {
        match self {
            AdapterConfig::FixedStation { name, .. }
            | AdapterConfig::MobileUnit { name, .. }
            | AdapterConfig::WideArea { name, .. } => name,
        }
    }

    pub fn source_class(&self) -> SourceClass {
        match self {
            AdapterConfig::FixedStation { .. } => SourceClass::FixedStation,
            AdapterConfig::MobileUnit { .. } => SourceClass::MobileUnit,
            AdapterConfig::WideArea { .. } => SourceClass::WideArea,
        }
    }
}

/// The closed set of source adapters
#[derive(Clone)]
pub enum SourceAdapter {
    FixedStation(FixedStationAdapter),
    MobileUnit(MobileUnitAdapter),
    WideArea(WideAreaAdapter),
}

impl SourceAdapter {
    /// Build an adapter, reading credentials from the process environment
    pub fn from_config(config: &AdapterConfig, transport: Arc<dyn Transport>) -> ConnectorResult<Self> {
        Self::from_config_with_env(config, transport, |key| std::env::var(key).ok())
    }

    /// Build an adapter with an explicit environment lookup
    pub fn from_config_with_env<F>(
        config: &AdapterConfig,
        transport: Arc<dyn Transport>,
        env: F,
    ) -> ConnectorResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let credential = |key: &str| {
            env(key).ok_or_else(|| {
                ConnectorError::Config(format!(
                    "source '{}' needs environment variable {key}",
                    config.name()
                ))
            })
        };

        let adapter = match config {
            AdapterConfig::FixedStation {
                name,
                base_url,
                stations,
                products,
                datum,
            } => SourceAdapter::FixedStation(
                FixedStationAdapter::new(name.clone(), base_url.clone(), transport)
                    .with_stations(stations.iter().map(String::as_str))
                    .with_products(products.iter().cloned())
                    .with_datum(datum.clone()),
            ),
            AdapterConfig::MobileUnit {
                name,
                base_url,
                username_env,
                password_env,
                series,
                auth_attempts,
            } => SourceAdapter::MobileUnit(
                MobileUnitAdapter::new(
                    name.clone(),
                    base_url.clone(),
                    credential(username_env)?,
                    credential(password_env)?,
                    transport,
                )
                .with_series(series.iter().cloned())
                .with_auth_attempts(*auth_attempts),
            ),
            AdapterConfig::WideArea {
                name,
                dataset_url,
                bounds,
                variables,
            } => SourceAdapter::WideArea(
                WideAreaAdapter::new(name.clone(), dataset_url.clone(), *bounds, transport)
                    .with_variables(variables.iter().cloned()),
            ),
        };
        Ok(adapter)
    }

    fn inner(&self) -> &dyn FetchRaw {
        match self {
            SourceAdapter::FixedStation(a) => a,
            SourceAdapter::MobileUnit(a) => a,
            SourceAdapter::WideArea(a) => a,
        }
    }
}

#[async_trait]
impl FetchRaw for SourceAdapter {
    fn name(&self) -> &str {
        self.inner().name()
    }

    fn source_class(&self) -> SourceClass {
        self.inner().source_class()
    }

    async fn fetch_raw(&self, query: &FetchQuery) -> ConnectorResult<Vec<RawReading>> {
        self.inner().fetch_raw(query).await
    }
}
