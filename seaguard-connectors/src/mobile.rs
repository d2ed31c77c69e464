//! Mobile-unit adapter (buoy tracking API)
//!
//! Session flow:
//!
//! ```text
//! POST /auth (form login, bounded attempts) ──► token
//! GET  /user                                 ──► {"buoys": [...]}
//! GET  /buoy/{id}/details                    ──► {"series": [...]}   (when no series configured)
//! GET  /buoy/{id}/reports?series=a,b,c       ──► {"series": {"<param>": [{momsn, time, value}]}}
//! ```
//!
//! Series values are regrouped into one reading per (message number, time).
//! The position series become the reading's coordinates and the system
//! status bitfield is decoded rather than passed on as a value.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use seaguard_core::{SensorId, SourceClass};
use seaguard_schemas::{parse_datetime, RawField, RawReading};

use crate::http::{HttpError, Transport};
use crate::{run_blocking, ConnectorError, ConnectorResult, FetchQuery, FetchRaw};

/// Login attempts before the source is reported unavailable
pub const DEFAULT_AUTH_ATTEMPTS: u32 = 3;

const LATITUDE_SERIES: &str = "position_latitude";
const LONGITUDE_SERIES: &str = "position_longitude";
const STATUS_SERIES: &str = "system_status";

/// Decoded system status bitfield of a buoy report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SystemStatus(u32);

impl SystemStatus {
    pub const IN_WATER: u32 = 0x1;
    pub const RESURFACED: u32 = 0x100;
    pub const SALT_WATER_SENSOR: u32 = 0x200;
    pub const SCHEDULED: u32 = 0x400;
    pub const MOVED: u32 = 0x800;
    pub const RETRY: u32 = 0x1000;
    pub const GPS_NO_FIX: u32 = 0x2000;

    const NAMES: [(u32, &'static str); 7] = [
        (Self::IN_WATER, "in_water"),
        (Self::RESURFACED, "resurfaced"),
        (Self::SALT_WATER_SENSOR, "sws"),
        (Self::SCHEDULED, "scheduled"),
        (Self::MOVED, "moved"),
        (Self::RETRY, "retry"),
        (Self::GPS_NO_FIX, "fault_gps_no_fix"),
    ];

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn contains(&self, flag: u32) -> bool {
        self.0 & flag == flag
    }

    pub const fn gps_no_fix(&self) -> bool {
        self.contains(Self::GPS_NO_FIX)
    }

    /// Names of every flag that is set
    pub fn flags(&self) -> Vec<&'static str> {
        Self::NAMES
            .iter()
            .filter(|(bit, _)| self.contains(*bit))
            .map(|(_, name)| *name)
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    buoys: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct DetailsResponse {
    #[serde(default)]
    series: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SeriesPoint {
    #[serde(default)]
    momsn: Option<i64>,
    time: String,
    #[serde(default)]
    value: Value,
}

/// Adapter for a mobile-unit origin
#[derive(Clone)]
pub struct MobileUnitAdapter {
    name: String,
    base_url: String,
    username: String,
    password: String,
    series: Vec<String>,
    auth_attempts: u32,
    transport: Arc<dyn Transport>,
}

impl MobileUnitAdapter {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            username: username.into(),
            password: password.into(),
            series: Vec::new(),
            auth_attempts: DEFAULT_AUTH_ATTEMPTS,
            transport,
        }
    }

    /// Series to request; empty asks each buoy for its available series
    pub fn with_series<I, S>(mut self, series: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.series = series.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_auth_attempts(mut self, attempts: u32) -> Self {
        self.auth_attempts = attempts.max(1);
        self
    }

    fn login(&self) -> ConnectorResult<Vec<(String, String)>> {
        let url = format!("{}/auth", self.base_url);
        let form = [
            ("type", "login"),
            ("username", self.username.as_str()),
            ("password", self.password.as_str()),
        ];

        let mut last_error = None;
        for attempt in 1..=self.auth_attempts {
            match self.transport.post_form(&url, &form, &[]) {
                Ok(body) => {
                    let token: TokenResponse = serde_json::from_str(&body)?;
                    return Ok(vec![(
                        "Authorization".to_string(),
                        format!("Bearer {}", token.token),
                    )]);
                }
                Err(e) => {
                    log::debug!("{}: login attempt {} failed: {}", self.name, attempt, e);
                    last_error = Some(e);
                }
            }
        }
        Err(ConnectorError::Auth(
            last_error.map(|e| e.to_string()).unwrap_or_default(),
        ))
    }

    fn buoy_ids(&self, headers: &[(String, String)]) -> ConnectorResult<Vec<SensorId>> {
        let body = self.transport.get(&format!("{}/user", self.base_url), headers)?;
        let user: UserResponse = serde_json::from_str(&body)?;
        Ok(user
            .buoys
            .iter()
            .filter_map(|id| match id {
                Value::String(s) => Some(SensorId::new(s.clone())),
                Value::Number(n) => Some(SensorId::new(n.to_string())),
                _ => None,
            })
            .collect())
    }

    fn series_for(&self, buoy: &SensorId, headers: &[(String, String)]) -> ConnectorResult<Vec<String>> {
        if !self.series.is_empty() {
            return Ok(self.series.clone());
        }
        let url = format!("{}/buoy/{}/details", self.base_url, buoy);
        let details: DetailsResponse = serde_json::from_str(&self.transport.get(&url, headers)?)?;
        let mut series = details.series;
        for required in [LATITUDE_SERIES, LONGITUDE_SERIES, STATUS_SERIES] {
            if !series.iter().any(|s| s == required) {
                series.push(required.to_string());
            }
        }
        Ok(series)
    }

    fn fetch_blocking(&self, query: &FetchQuery) -> ConnectorResult<Vec<RawReading>> {
        let headers = self.login()?;
        let known = self.buoy_ids(&headers)?;
        let buoys = query.select(&known);

        let mut readings = Vec::new();
        for buoy in &buoys {
            let series = self.series_for(buoy, &headers)?;
            let url = format!(
                "{}/buoy/{}/reports?series={}",
                self.base_url,
                buoy,
                series.join(",")
            );
            let body = match self.transport.get(&url, &headers) {
                Ok(body) => body,
                Err(HttpError::Status { status: 404, .. }) => {
                    log::warn!("{}: buoy {} has no reports", self.name, buoy);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            let reports = group_reports(buoy, &body)?;
            readings.extend(reports.into_iter().filter(|r| in_window(r, query)));
        }
        Ok(readings)
    }
}

#[async_trait]
impl FetchRaw for MobileUnitAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn source_class(&self) -> SourceClass {
        SourceClass::MobileUnit
    }

    async fn fetch_raw(&self, query: &FetchQuery) -> ConnectorResult<Vec<RawReading>> {
        let this = self.clone();
        let query = query.clone();
        run_blocking(move || this.fetch_blocking(&query)).await
    }
}

fn in_window(reading: &RawReading, query: &FetchQuery) -> bool {
    // unparseable times are left for the normalizer to reject
    parse_datetime(&reading.time)
        .map(|t| query.window.contains(t))
        .unwrap_or(true)
}

/// Regroup a reports body into one reading per (time, message number)
fn group_reports(buoy: &SensorId, body: &str) -> ConnectorResult<Vec<RawReading>> {
    let mut results: Value = serde_json::from_str(body)?;
    // the body sometimes nests as {"series": {"series": {...}}}
    while let Some(inner) = results.get_mut("series") {
        results = inner.take();
    }
    let Value::Object(series) = results else {
        return Err(ConnectorError::Malformed("reports body is not an object".into()));
    };

    let mut grouped: BTreeMap<(String, Option<i64>), RawReading> = BTreeMap::new();
    let mut statuses: BTreeMap<(String, Option<i64>), SystemStatus> = BTreeMap::new();
    for (parameter, points) in series {
        let points: Vec<SeriesPoint> = serde_json::from_value(points)?;
        for point in points {
            let key = (point.time.clone(), point.momsn);
            let reading = grouped
                .entry(key.clone())
                .or_insert_with(|| RawReading::new(buoy.as_str(), point.time.clone()));
            match parameter.as_str() {
                LATITUDE_SERIES => reading.lat = Some(point.value),
                LONGITUDE_SERIES => reading.lon = Some(point.value),
                STATUS_SERIES => {
                    let bits = point.value.as_u64().unwrap_or(0) as u32;
                    statuses.insert(key, SystemStatus::from_bits(bits));
                }
                _ => reading.fields.push(RawField::new(parameter.clone(), point.value)),
            }
        }
    }

    for (key, status) in statuses {
        if !status.gps_no_fix() {
            continue;
        }
        if let Some(reading) = grouped.get_mut(&key) {
            log::warn!("buoy {} report at {}: fault_gps_no_fix", buoy, key.0);
            for field in &mut reading.fields {
                field.qc = Some("suspect".to_string());
            }
        }
    }

    Ok(grouped.into_values().collect())
}
