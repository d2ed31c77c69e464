//! Source Adapters for Ocean-Sensor Origins
//!
//! ## Overview
//!
//! Each adapter owns the connection and authentication details of one origin
//! and returns readings in that origin's shape. No vocabulary mapping
//! happens here; the readings are handed to the canonical normalizer in
//! `seaguard-schemas` untouched apart from being split into rows.
//!
//! ## Adapter Variants
//!
//! ### Fixed station (tide-gauge style API)
//!
//! **Origin shape:** `{"data":[{"t","v","s","d","g","f","q"}]}` per
//! (station, product, date range).
//!
//! **Characteristics:**
//! - Requests are capped at 31 days, so the window is chunked
//! - Single-letter columns are expanded to origin parameter names
//! - Location is not in the payload; it comes from the sensor registry
//!
//! ### Mobile unit (buoy tracking API)
//!
//! **Origin shape:** `{"series":{"<param>":[{"momsn","time","value"}]}}`
//!
//! **Characteristics:**
//! - Bearer token obtained by form login, bounded attempts
//! - Buoy list from the user profile
//! - One row per (message number, time); position travels with the row
//! - System status bitfield decoded; a GPS without fix marks the row suspect
//!
//! ### Wide area (gridded satellite product)
//!
//! **Origin shape:** `{"table":{"columnNames":[...],"rows":[[...]]}}`
//!
//! **Characteristics:**
//! - One row per grid cell and time step
//! - Sensor id is the grid cell, `"{lat}_{lon}"`
//!
//! ## Failure Isolation
//!
//! [`fetch_all`] runs every adapter as its own tokio task under a mandatory
//! timeout. An adapter that fails, panics or overruns produces a
//! `SourceUnavailable` outcome for itself only:
//!
//! ```text
//! fetch_all ──┬── task(fixed)   ── timeout ──► SourceFetch { Ok(readings) }
//!             ├── task(mobile)  ── timeout ──► SourceFetch { Err(SourceUnavailable) }
//!             └── task(wide)    ── timeout ──► SourceFetch { Ok(readings) }
//! ```
//!
//! ## Transport
//!
//! Adapters talk HTTP through the [`Transport`] seam. [`http::HttpTransport`]
//! is the production implementation; tests inject canned responses.
//!
//! ## Example Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use seaguard_connectors::{fetch_all, FetchQuery, FetchRaw};
//! use seaguard_connectors::fixed::FixedStationAdapter;
//! use seaguard_connectors::http::{HttpConfig, HttpTransport};
//! use seaguard_core::TimeWindow;
//!
//! # async fn example(window: TimeWindow) -> Result<(), Box<dyn std::error::Error>> {
//! let transport = Arc::new(HttpTransport::new(HttpConfig::default()));
//! let gauges = FixedStationAdapter::new(
//!     "tide-gauges",
//!     "https://api.tidesandcurrents.noaa.gov/api/prod/datagetter",
//!     transport,
//! )
//! .with_stations(["8454000", "8452660"])
//! .with_products(["water_level", "water_temperature"]);
//!
//! let adapters: Vec<Arc<dyn FetchRaw>> = vec![Arc::new(gauges)];
//! let outcomes = fetch_all(&adapters, &FetchQuery::all(window), Duration::from_secs(30)).await;
//! for outcome in outcomes {
//!     println!("{}: {:?}", outcome.source, outcome.readings().map(|r| r.len()));
//! }
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use seaguard_core::{PipelineError, SensorId, SourceClass, TimeWindow};
use seaguard_schemas::RawReading;

pub mod config;
pub mod fanout;
pub mod fixed;
pub mod http;
pub mod mobile;
pub mod wide_area;

pub use config::{AdapterConfig, SourceAdapter};
pub use fanout::{fetch_all, SourceFetch};
pub use http::{HttpConfig, HttpError, HttpTransport, Transport};

/// Result type for adapter operations
pub type ConnectorResult<T> = Result<T, ConnectorError>;

/// Common connector errors
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Http(#[from] HttpError),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("origin reported an error: {0}")]
    Origin(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("adapter task failed: {0}")]
    Task(String),
}

impl From<serde_json::Error> for ConnectorError {
    fn from(err: serde_json::Error) -> Self {
        ConnectorError::Malformed(err.to_string())
    }
}

impl ConnectorError {
    /// Attribute the failure to a named source
    pub fn into_pipeline(self, source_name: &str) -> PipelineError {
        PipelineError::SourceUnavailable {
            source_name: source_name.to_string(),
            reason: self.to_string(),
        }
    }
}

/// What to fetch from a source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchQuery {
    /// Sensors to fetch; empty means every sensor known to the source
    #[serde(default)]
    pub sensor_ids: Vec<SensorId>,
    pub window: TimeWindow,
}

impl FetchQuery {
    pub fn all(window: TimeWindow) -> Self {
        Self {
            sensor_ids: Vec::new(),
            window,
        }
    }

    pub fn for_sensors(sensor_ids: impl IntoIterator<Item = SensorId>, window: TimeWindow) -> Self {
        Self {
            sensor_ids: sensor_ids.into_iter().collect(),
            window,
        }
    }

    /// Restrict `known` to the requested sensors, or keep all when none requested
    pub fn select(&self, known: &[SensorId]) -> Vec<SensorId> {
        if self.sensor_ids.is_empty() {
            known.to_vec()
        } else {
            self.sensor_ids
                .iter()
                .filter(|id| known.is_empty() || known.contains(id))
                .cloned()
                .collect()
        }
    }

    pub fn wants(&self, id: &str) -> bool {
        self.sensor_ids.is_empty() || self.sensor_ids.iter().any(|s| s.as_str() == id)
    }
}

/// Capability shared by every source adapter
#[async_trait]
pub trait FetchRaw: Send + Sync {
    /// Configured source name, used in logs and run summaries
    fn name(&self) -> &str;

    /// Class of every sensor this source reports
    fn source_class(&self) -> SourceClass;

    /// Fetch source-native readings for the query
    async fn fetch_raw(&self, query: &FetchQuery) -> ConnectorResult<Vec<RawReading>>;
}

/// Request counters kept by a transport
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct FetchStats {
    /// Requests answered with a success status
    pub requests_ok: u64,
    /// Requests that failed after all retries
    pub requests_failed: u64,
    /// Retries performed
    pub retries: u64,
    /// Response bytes received
    pub bytes_received: u64,
}

/// Run blocking origin I/O off the async runtime
pub(crate) async fn run_blocking<T, F>(job: F) -> ConnectorResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> ConnectorResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(job)
        .await
        .map_err(|e| ConnectorError::Task(e.to_string()))?
}

#[cfg(test)]
pub(crate) mod testing {
    //! Canned-response transport shared by the adapter tests

    use std::collections::HashMap;
    use std::sync::Mutex;

    use crate::http::{HttpError, Transport};

    #[derive(Default)]
    pub struct CannedTransport {
        responses: HashMap<String, String>,
        pub requests: Mutex<Vec<String>>,
        pub headers: Mutex<Vec<(String, String)>>,
    }

    impl CannedTransport {
        /// Respond to any URL containing `fragment` with `body`
        pub fn respond(mut self, fragment: &str, body: &str) -> Self {
            self.responses.insert(fragment.to_string(), body.to_string());
            self
        }

        fn answer(&self, url: &str, headers: &[(String, String)]) -> Result<String, HttpError> {
            self.requests.lock().unwrap().push(url.to_string());
            self.headers.lock().unwrap().extend(headers.iter().cloned());
            let mut matches: Vec<_> = self
                .responses
                .iter()
                .filter(|(fragment, _)| url.contains(fragment.as_str()))
                .collect();
            // most specific fragment wins
            matches.sort_by_key(|(fragment, _)| std::cmp::Reverse(fragment.len()));
            matches
                .first()
                .map(|(_, body)| body.to_string())
                .ok_or(HttpError::Status {
                    status: 404,
                    message: url.to_string(),
                })
        }
    }

    impl Transport for CannedTransport {
        fn get(&self, url: &str, headers: &[(String, String)]) -> Result<String, HttpError> {
            self.answer(url, headers)
        }

        fn post_form(
            &self,
            url: &str,
            _form: &[(&str, &str)],
            headers: &[(String, String)],
        ) -> Result<String, HttpError> {
            self.answer(url, headers)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use seaguard_core::ErrorKind;

    fn window() -> TimeWindow {
        TimeWindow::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_query_select() {
        let known = vec![SensorId::from("a"), SensorId::from("b")];
        assert_eq!(FetchQuery::all(window()).select(&known), known);

        let query = FetchQuery::for_sensors([SensorId::from("b"), SensorId::from("z")], window());
        assert_eq!(query.select(&known), vec![SensorId::from("b")]);
        assert!(query.wants("z"));
        assert!(!query.wants("a"));
    }

    #[test]
    fn test_errors_become_source_unavailable() {
        let err = ConnectorError::Origin("No data was found".into()).into_pipeline("gauges");
        assert_eq!(err.kind(), ErrorKind::SourceUnavailable);
        assert!(err.to_string().contains("gauges"));
    }
}
