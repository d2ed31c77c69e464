//! Shared helpers for connector integration tests

use std::sync::Mutex;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use seaguard_connectors::{HttpError, Transport};
use seaguard_core::TimeWindow;

/// Transport answering every request with one body after a fixed delay
pub struct ScriptedTransport {
    pub body: String,
    pub delay: Duration,
    pub calls: Mutex<u32>,
}

impl ScriptedTransport {
    pub fn new(body: &str) -> Self {
        Self {
            body: body.to_string(),
            delay: Duration::ZERO,
            calls: Mutex::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn answer(&self) -> Result<String, HttpError> {
        *self.calls.lock().unwrap() += 1;
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        Ok(self.body.clone())
    }
}

impl Transport for ScriptedTransport {
    fn get(&self, _url: &str, _headers: &[(String, String)]) -> Result<String, HttpError> {
        self.answer()
    }

    fn post_form(
        &self,
        _url: &str,
        _form: &[(&str, &str)],
        _headers: &[(String, String)],
    ) -> Result<String, HttpError> {
        self.answer()
    }
}

pub fn one_day() -> TimeWindow {
    let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
    TimeWindow::new(start, start + chrono::Duration::days(1)).unwrap()
}

pub const GAUGE_BODY: &str = r#"{"data":[
    {"t":"2024-03-01 00:00","v":"1.021","s":"0.004","f":"0,0,0,0","q":"v"},
    {"t":"2024-03-01 00:06","v":"1.034","s":"0.003","f":"0,0,0,0","q":"v"}]}"#;

pub const GRID_BODY: &str = r#"{"table":{
    "columnNames":["time","zlev","latitude","longitude","sst","anom","err","ice"],
    "rows":[["2024-03-01T12:00:00Z",0.0,41.125,289.875,4.9,0.3,0.2,null]]}}"#;
