//! Fixed-station adapter (tide-gauge style API)
//!
//! One request per (station, product, chunk of at most 31 days). The origin
//! answers with single-letter columns which are expanded to origin parameter
//! names here; vocabulary mapping stays with the normalizer.
//!
//! | Column | Expanded to |
//! |--------|-------------|
//! | `t`    | reading time |
//! | `v`    | `{product}` (`tide_prediction` for predictions) |
//! | `s`    | `{product}_speed`, except water level where it is a standard deviation and dropped |
//! | `d`    | `{product}_direction` |
//! | `g`    | `{product}_gust_speed` |
//! | `b`    | `{product}_bin` |
//! | `f`    | QC flag list applied to every value of the row |
//! | `q`    | verification code, used when no flag list is present |

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::Value;

use seaguard_core::{SensorId, SourceClass};
use seaguard_schemas::{RawField, RawReading};

use crate::http::Transport;
use crate::{run_blocking, ConnectorError, ConnectorResult, FetchQuery, FetchRaw};

/// Longest range the origin serves in one request
pub const MAX_REQUEST_DAYS: i64 = 31;

#[derive(Debug, Deserialize)]
struct GaugeResponse {
    #[serde(default)]
    data: Option<Vec<GaugeRow>>,
    #[serde(default)]
    predictions: Option<Vec<GaugeRow>>,
    #[serde(default)]
    error: Option<GaugeError>,
}

#[derive(Debug, Deserialize)]
struct GaugeError {
    message: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GaugeRow {
    t: String,
    v: Option<Value>,
    s: Option<Value>,
    d: Option<Value>,
    g: Option<Value>,
    b: Option<Value>,
    f: Option<String>,
    q: Option<String>,
}

/// Adapter for a fixed-station origin
#[derive(Clone)]
pub struct FixedStationAdapter {
    name: String,
    base_url: String,
    stations: Vec<SensorId>,
    products: Vec<String>,
    datum: String,
    transport: Arc<dyn Transport>,
}

impl FixedStationAdapter {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            stations: Vec::new(),
            products: vec!["water_level".to_string(), "water_temperature".to_string()],
            datum: "MLLW".to_string(),
            transport,
        }
    }

    /// Stations served when a query names no sensors
    pub fn with_stations<I, S>(mut self, stations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<SensorId>,
    {
        self.stations = stations.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_products<I, S>(mut self, products: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.products = products.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_datum(mut self, datum: impl Into<String>) -> Self {
        self.datum = datum.into();
        self
    }

    fn request_url(&self, station: &SensorId, product: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> String {
        format!(
            "{}?begin_date={}&end_date={}&station={}&product={}&datum={}&units=metric&time_zone=gmt&application=seaguard&format=json",
            self.base_url,
            start.format("%Y%m%d%%20%H:%M"),
            end.format("%Y%m%d%%20%H:%M"),
            station,
            product,
            self.datum,
        )
    }

    fn fetch_blocking(&self, query: &FetchQuery) -> ConnectorResult<Vec<RawReading>> {
        let stations = query.select(&self.stations);
        if stations.is_empty() {
            return Err(ConnectorError::Config(format!(
                "source '{}' has no stations to fetch",
                self.name
            )));
        }

        let mut readings = Vec::new();
        for station in &stations {
            for chunk in query.window.chunks(Duration::days(MAX_REQUEST_DAYS)) {
                for product in &self.products {
                    let url = self.request_url(station, product, chunk.start, chunk.end);
                    let body = self.transport.get(&url, &[])?;
                    let rows = parse_gauge_body(&body)?;
                    readings.extend(rows.into_iter().map(|row| expand_row(station, product, row)));
                }
            }
        }
        log::debug!(
            "{}: {} readings from {} stations",
            self.name,
            readings.len(),
            stations.len()
        );
        Ok(readings)
    }
}

#[async_trait]
impl FetchRaw for FixedStationAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn source_class(&self) -> SourceClass {
        SourceClass::FixedStation
    }

    async fn fetch_raw(&self, query: &FetchQuery) -> ConnectorResult<Vec<RawReading>> {
        let this = self.clone();
        let query = query.clone();
        run_blocking(move || this.fetch_blocking(&query)).await
    }
}

fn parse_gauge_body(body: &str) -> ConnectorResult<Vec<GaugeRow>> {
    let response: GaugeResponse = serde_json::from_str(body)?;
    if let Some(error) = response.error {
        return Err(ConnectorError::Origin(error.message));
    }
    response
        .data
        .or(response.predictions)
        .ok_or_else(|| ConnectorError::Malformed("neither 'data' nor 'predictions' present".into()))
}

fn expand_row(station: &SensorId, product: &str, row: GaugeRow) -> RawReading {
    let qc = row.f.clone().or_else(|| row.q.clone());
    let mut reading = RawReading::new(station.as_str(), row.t);
    let mut push = |parameter: String, value: Option<Value>| {
        if let Some(value) = value {
            let mut field = RawField::new(parameter, value);
            field.qc = qc.clone();
            reading.fields.push(field);
        }
    };

    let value_name = if product == "predictions" {
        "tide_prediction".to_string()
    } else {
        product.to_string()
    };
    push(value_name, row.v);
    if product != "water_level" {
        push(format!("{product}_speed"), row.s);
    }
    push(format!("{product}_direction"), row.d);
    push(format!("{product}_gust_speed"), row.g);
    push(format!("{product}_bin"), row.b);
    reading
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::CannedTransport;
    use chrono::TimeZone;
    use seaguard_core::TimeWindow;

    const WATER_LEVEL: &str = r#"{"metadata":{"id":"8454000"},"data":[
        {"t":"2024-03-01 00:00","v":"1.021","s":"0.004","f":"0,0,0,0","q":"v"},
        {"t":"2024-03-01 00:06","v":"1.034","s":"0.003","f":"0,0,1,0","q":"v"}]}"#;

    const WIND: &str = r#"{"data":[
        {"t":"2024-03-01 00:00","s":"4.1","d":"210.0","dr":"SSW","g":"6.2","f":"0,0"}]}"#;

    fn window(days: i64) -> TimeWindow {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        TimeWindow::new(start, start + Duration::days(days)).unwrap()
    }

    #[tokio::test]
    async fn test_water_level_rows_expanded() {
        let transport = Arc::new(CannedTransport::default().respond("product=water_level", WATER_LEVEL));
        let adapter = FixedStationAdapter::new("gauges", "https://gauges.test/api", transport)
            .with_stations(["8454000"])
            .with_products(["water_level"]);

        let readings = adapter.fetch_raw(&FetchQuery::all(window(1))).await.unwrap();
        assert_eq!(readings.len(), 2);
        assert_eq!(readings[0].sensor_id, "8454000");
        assert_eq!(readings[0].time, "2024-03-01 00:00");
        // standard deviation column is not a measurement
        assert_eq!(readings[0].fields.len(), 1);
        assert_eq!(readings[0].fields[0].parameter, "water_level");
        assert_eq!(readings[1].fields[0].qc.as_deref(), Some("0,0,1,0"));
        assert!(readings[0].lat.is_none());
    }

    #[tokio::test]
    async fn test_wind_columns_expanded() {
        let transport = Arc::new(CannedTransport::default().respond("product=wind", WIND));
        let adapter = FixedStationAdapter::new("gauges", "https://gauges.test/api", transport)
            .with_stations(["8452660"])
            .with_products(["wind"]);

        let readings = adapter.fetch_raw(&FetchQuery::all(window(1))).await.unwrap();
        let names: Vec<_> = readings[0].fields.iter().map(|f| f.parameter.as_str()).collect();
        assert_eq!(names, vec!["wind_speed", "wind_direction", "wind_gust_speed"]);
    }

    #[tokio::test]
    async fn test_long_window_is_chunked() {
        let transport = Arc::new(CannedTransport::default().respond("product=water_level", WATER_LEVEL));
        let adapter = FixedStationAdapter::new("gauges", "https://gauges.test/api", transport.clone())
            .with_stations(["8454000"])
            .with_products(["water_level"]);

        adapter.fetch_raw(&FetchQuery::all(window(70))).await.unwrap();
        let requests = transport.requests.lock().unwrap();
        assert_eq!(requests.len(), 3);
        assert!(requests[0].contains("begin_date=20240301%2000:00"));
    }

    #[tokio::test]
    async fn test_origin_error_body_fails_source() {
        let transport = Arc::new(CannedTransport::default().respond(
            "product=water_level",
            r#"{"error":{"message":"No data was found."}}"#,
        ));
        let adapter = FixedStationAdapter::new("gauges", "https://gauges.test/api", transport)
            .with_stations(["8454000"])
            .with_products(["water_level"]);

        let err = adapter.fetch_raw(&FetchQuery::all(window(1))).await.unwrap_err();
        assert!(matches!(err, ConnectorError::Origin(ref m) if m.contains("No data")));
    }

    #[tokio::test]
    async fn test_query_sensors_override_configured_stations() {
        let transport = Arc::new(CannedTransport::default().respond("product=water_level", WATER_LEVEL));
        let adapter = FixedStationAdapter::new("gauges", "https://gauges.test/api", transport.clone())
            .with_products(["water_level"]);

        let query = FetchQuery::for_sensors([SensorId::from("8447930")], window(1));
        adapter.fetch_raw(&query).await.unwrap();
        assert!(transport.requests.lock().unwrap()[0].contains("station=8447930"));
    }
}
