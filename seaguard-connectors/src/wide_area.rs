//! Wide-area adapter (gridded satellite product served as a JSON table)
//!
//! Each table row is one grid cell at one time step. The cell coordinates
//! become the sensor id, formatted `"{lat}_{lon}"`.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use seaguard_core::SourceClass;
use seaguard_schemas::{RawField, RawReading};

use crate::http::Transport;
use crate::{run_blocking, ConnectorError, ConnectorResult, FetchQuery, FetchRaw};

/// Bounding box and stride of the grid request
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridBounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
    /// Take every n-th cell along each axis
    #[serde(default = "default_stride")]
    pub stride: u32,
}

fn default_stride() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
struct TableResponse {
    table: Table,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Table {
    column_names: Vec<String>,
    rows: Vec<Vec<Value>>,
}

/// Grid-cell sensor id
pub fn cell_id(lat: f64, lon: f64) -> String {
    format!("{lat}_{lon}")
}

/// Adapter for a gridded wide-area origin
#[derive(Clone)]
pub struct WideAreaAdapter {
    name: String,
    dataset_url: String,
    variables: Vec<String>,
    bounds: GridBounds,
    transport: Arc<dyn Transport>,
}

impl WideAreaAdapter {
    pub fn new(
        name: impl Into<String>,
        dataset_url: impl Into<String>,
        bounds: GridBounds,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            name: name.into(),
            dataset_url: dataset_url.into(),
            variables: ["sst", "anom", "err", "ice"].map(String::from).to_vec(),
            bounds,
            transport,
        }
    }

    pub fn with_variables<I, S>(mut self, variables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.variables = variables.into_iter().map(Into::into).collect();
        self
    }

    fn request_url(&self, query: &FetchQuery) -> String {
        let b = &self.bounds;
        let selector = format!(
            "[({}):1:({})][(0.0):1:(0.0)][({}):{}:({})][({}):{}:({})]",
            query.window.start.format("%Y-%m-%dT%H:%M:%SZ"),
            query.window.end.format("%Y-%m-%dT%H:%M:%SZ"),
            b.min_lat,
            b.stride,
            b.max_lat,
            b.min_lon,
            b.stride,
            b.max_lon,
        );
        let variables: Vec<String> = self
            .variables
            .iter()
            .map(|v| format!("{v}{selector}"))
            .collect();
        format!("{}?{}", self.dataset_url, variables.join(","))
    }

    fn fetch_blocking(&self, query: &FetchQuery) -> ConnectorResult<Vec<RawReading>> {
        if self.variables.is_empty() {
            return Err(ConnectorError::Config(format!(
                "source '{}' requests no variables",
                self.name
            )));
        }
        let body = self.transport.get(&self.request_url(query), &[])?;
        let readings = parse_table(&body)?;
        Ok(readings.into_iter().filter(|r| query.wants(&r.sensor_id)).collect())
    }
}

#[async_trait]
impl FetchRaw for WideAreaAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn source_class(&self) -> SourceClass {
        SourceClass::WideArea
    }

    async fn fetch_raw(&self, query: &FetchQuery) -> ConnectorResult<Vec<RawReading>> {
        let this = self.clone();
        let query = query.clone();
        run_blocking(move || this.fetch_blocking(&query)).await
    }
}

fn parse_table(body: &str) -> ConnectorResult<Vec<RawReading>> {
    let response: TableResponse = serde_json::from_str(body)?;
    let columns = &response.table.column_names;
    let position = |name: &str| {
        columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| ConnectorError::Malformed(format!("missing column '{name}'")))
    };
    let time_col = position("time")?;
    let lat_col = position("latitude")?;
    let lon_col = position("longitude")?;

    let mut readings = Vec::with_capacity(response.table.rows.len());
    for row in response.table.rows {
        if row.len() != columns.len() {
            return Err(ConnectorError::Malformed(format!(
                "row has {} cells, expected {}",
                row.len(),
                columns.len()
            )));
        }
        let (Some(lat), Some(lon)) = (row[lat_col].as_f64(), row[lon_col].as_f64()) else {
            return Err(ConnectorError::Malformed("non-numeric grid coordinates".into()));
        };
        let time = row[time_col].as_str().unwrap_or_default().to_string();

        let mut reading = RawReading::new(cell_id(lat, lon), time);
        reading.lat = Some(row[lat_col].clone());
        reading.lon = Some(row[lon_col].clone());
        for (i, cell) in row.into_iter().enumerate() {
            let name = columns[i].as_str();
            if i == time_col || i == lat_col || i == lon_col || name == "zlev" {
                continue;
            }
            reading.fields.push(RawField::new(name, cell));
        }
        readings.push(reading);
    }
    Ok(readings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::CannedTransport;
    use chrono::{Duration, TimeZone, Utc};
    use seaguard_core::{SensorId, TimeWindow};

    const TABLE: &str = r#"{"table":{
        "columnNames":["time","zlev","latitude","longitude","sst","anom","err","ice"],
        "columnTypes":["String","float","float","float","float","float","float","float"],
        "rows":[
            ["2024-02-10T12:00:00Z",0.0,41.125,289.875,4.9,0.3,0.2,null],
            ["2024-02-10T12:00:00Z",0.0,41.375,289.875,5.1,0.4,0.2,null]
        ]}}"#;

    fn adapter(transport: Arc<CannedTransport>) -> WideAreaAdapter {
        let bounds = GridBounds {
            min_lat: 41.0,
            max_lat: 41.5,
            min_lon: 289.5,
            max_lon: 290.0,
            stride: 1,
        };
        WideAreaAdapter::new("oisst", "https://grid.test/griddap/oisst.json", bounds, transport)
    }

    fn window() -> TimeWindow {
        let start = Utc.with_ymd_and_hms(2024, 2, 10, 0, 0, 0).unwrap();
        TimeWindow::new(start, start + Duration::days(1)).unwrap()
    }

    #[tokio::test]
    async fn test_rows_become_cell_readings() {
        let transport = Arc::new(CannedTransport::default().respond("oisst.json", TABLE));
        let readings = adapter(transport.clone())
            .fetch_raw(&FetchQuery::all(window()))
            .await
            .unwrap();

        assert_eq!(readings.len(), 2);
        assert_eq!(readings[0].sensor_id, "41.125_289.875");
        let names: Vec<_> = readings[0].fields.iter().map(|f| f.parameter.as_str()).collect();
        assert_eq!(names, vec!["sst", "anom", "err", "ice"]);
        assert_eq!(readings[0].fields[3].value, Value::Null);

        let url = &transport.requests.lock().unwrap()[0];
        assert!(url.contains("sst[(2024-02-10T00:00:00Z):1:(2024-02-11T00:00:00Z)]"));
    }

    #[tokio::test]
    async fn test_query_filters_cells() {
        let transport = Arc::new(CannedTransport::default().respond("oisst.json", TABLE));
        let query = FetchQuery::for_sensors([SensorId::from("41.375_289.875")], window());
        let readings = adapter(transport).fetch_raw(&query).await.unwrap();
        assert_eq!(readings.len(), 1);
    }

    #[test]
    fn test_missing_columns_are_malformed() {
        let err = parse_table(r#"{"table":{"columnNames":["time"],"rows":[]}}"#).unwrap_err();
        assert!(matches!(err, ConnectorError::Malformed(_)));
    }
}
