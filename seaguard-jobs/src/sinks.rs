//! Storage collaborators
//!
//! The job hands canonical rows to a [`CanonicalSink`] and results to a
//! [`ResultSink`]. Both are append-only. JSON-lines files cover local runs;
//! [`MemorySink`] backs tests and embedding callers.
//!
//! Canonical rows are write-once: [`CanonicalSink::append_new`] drops
//! records already stored, so retried runs and overlapping windows do not
//! duplicate history.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde::Serialize;

use chrono::{DateTime, Utc};

use seaguard_core::{AnomalyScore, CanonicalRecord, ForecastRecord, PipelineError, SensorId};

use crate::{JobError, JobResult};

/// Destination of normalized records, readable back as training history
pub trait CanonicalSink: Send + Sync {
    /// Append records; returns how many were written
    fn append(&self, records: &[CanonicalRecord]) -> JobResult<usize>;

    /// Every record appended so far, in append order
    fn history(&self) -> JobResult<Vec<CanonicalRecord>>;

    /// Append only the records not already stored; returns how many were
    /// written
    fn append_new(&self, records: &[CanonicalRecord]) -> JobResult<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        let fresh = unseen(&self.history()?, records);
        if fresh.len() < records.len() {
            log::debug!("{} of {} records already stored", records.len() - fresh.len(), records.len());
        }
        self.append(&fresh)
    }
}

/// Records of `batch` with no identical record in `stored` or earlier in
/// `batch`
///
/// Identity is the whole record. A correction that changes a quality flag
/// or value at the same instant is a new row.
pub fn unseen(stored: &[CanonicalRecord], batch: &[CanonicalRecord]) -> Vec<CanonicalRecord> {
    let mut index: HashMap<(SensorId, DateTime<Utc>), Vec<&CanonicalRecord>> = HashMap::new();
    for record in stored {
        index
            .entry((record.sensor_id().clone(), record.datetime()))
            .or_default()
            .push(record);
    }

    let mut fresh = Vec::new();
    for record in batch {
        let same_instant = index.entry((record.sensor_id().clone(), record.datetime())).or_default();
        if !same_instant.iter().any(|known| *known == record) {
            same_instant.push(record);
            fresh.push(record.clone());
        }
    }
    fresh
}

/// Destination of anomaly scores and forecasts
pub trait ResultSink: Send + Sync {
    fn write_scores(&self, scores: &[AnomalyScore]) -> JobResult<()>;

    fn write_forecasts(&self, forecasts: &[ForecastRecord]) -> JobResult<()>;
}

fn poisoned() -> JobError {
    JobError::Pipeline(PipelineError::StoreUnavailable {
        reason: "in-memory sink lock poisoned".into(),
    })
}

/// In-memory sink for records and results
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<CanonicalRecord>>,
    scores: Mutex<Vec<AnomalyScore>>,
    forecasts: Mutex<Vec<ForecastRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sink pre-loaded with history
    pub fn with_records(records: Vec<CanonicalRecord>) -> Self {
        Self {
            records: Mutex::new(records),
            ..Self::default()
        }
    }

    pub fn scores(&self) -> Vec<AnomalyScore> {
        self.scores.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn forecasts(&self) -> Vec<ForecastRecord> {
        self.forecasts.lock().map(|f| f.clone()).unwrap_or_default()
    }
}

impl CanonicalSink for MemorySink {
    fn append(&self, records: &[CanonicalRecord]) -> JobResult<usize> {
        let mut stored = self.records.lock().map_err(|_| poisoned())?;
        stored.extend_from_slice(records);
        Ok(records.len())
    }

    fn history(&self) -> JobResult<Vec<CanonicalRecord>> {
        Ok(self.records.lock().map_err(|_| poisoned())?.clone())
    }
}

impl ResultSink for MemorySink {
    fn write_scores(&self, scores: &[AnomalyScore]) -> JobResult<()> {
        self.scores.lock().map_err(|_| poisoned())?.extend_from_slice(scores);
        Ok(())
    }

    fn write_forecasts(&self, forecasts: &[ForecastRecord]) -> JobResult<()> {
        self.forecasts.lock().map_err(|_| poisoned())?.extend_from_slice(forecasts);
        Ok(())
    }
}

fn append_lines<T: Serialize>(path: &Path, items: &[T]) -> JobResult<()> {
    if items.is_empty() {
        return Ok(());
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| JobError::io(parent, e))?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| JobError::io(path, e))?;

    for item in items {
        let line = serde_json::to_string(item)?;
        writeln!(file, "{}", line).map_err(|e| JobError::io(path, e))?;
    }
    Ok(())
}

fn read_lines<T: DeserializeOwned>(path: &Path) -> JobResult<Vec<T>> {
    let file = match fs::File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(JobError::io(path, e)),
    };
    let mut items = Vec::new();
    for (number, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| JobError::io(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(item) => items.push(item),
            Err(e) => log::warn!("{}:{}: skipping unreadable line: {}", path.display(), number + 1, e),
        }
    }
    Ok(items)
}

/// Canonical records as one JSON object per line
#[derive(Debug, Clone)]
pub struct JsonLinesSink {
    path: PathBuf,
}

impl JsonLinesSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CanonicalSink for JsonLinesSink {
    fn append(&self, records: &[CanonicalRecord]) -> JobResult<usize> {
        append_lines(&self.path, records)?;
        Ok(records.len())
    }

    fn history(&self) -> JobResult<Vec<CanonicalRecord>> {
        read_lines(&self.path)
    }
}

/// Scores and forecasts in two JSON-lines files
#[derive(Debug, Clone)]
pub struct JsonLinesResultSink {
    scores_path: PathBuf,
    forecasts_path: PathBuf,
}

impl JsonLinesResultSink {
    pub fn new(scores_path: impl Into<PathBuf>, forecasts_path: impl Into<PathBuf>) -> Self {
        Self {
            scores_path: scores_path.into(),
            forecasts_path: forecasts_path.into(),
        }
    }

    pub fn read_scores(&self) -> JobResult<Vec<AnomalyScore>> {
        read_lines(&self.scores_path)
    }

    pub fn read_forecasts(&self) -> JobResult<Vec<ForecastRecord>> {
        read_lines(&self.forecasts_path)
    }
}

impl ResultSink for JsonLinesResultSink {
    fn write_scores(&self, scores: &[AnomalyScore]) -> JobResult<()> {
        append_lines(&self.scores_path, scores)
    }

    fn write_forecasts(&self, forecasts: &[ForecastRecord]) -> JobResult<()> {
        append_lines(&self.forecasts_path, forecasts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use seaguard_core::{Measurement, MeasurementEvent, Product, SensorId};
    use tempfile::TempDir;

    fn record(hour: u32) -> CanonicalRecord {
        CanonicalRecord::new(
            MeasurementEvent::at_station("8454000", Utc.with_ymd_and_hms(2024, 6, 1, hour, 0, 0).unwrap()),
            vec![Measurement::observed(Product::WaterLevel, 1.25)],
        )
    }

    #[test]
    fn test_jsonl_history_round_trip() {
        let dir = TempDir::new().unwrap();
        let sink = JsonLinesSink::new(dir.path().join("canonical").join("records.jsonl"));
        assert!(sink.history().unwrap().is_empty());

        sink.append(&[record(1), record(2)]).unwrap();
        sink.append(&[record(3)]).unwrap();
        let history = sink.history().unwrap();
        assert_eq!(history, vec![record(1), record(2), record(3)]);
    }

    #[test]
    fn test_unreadable_line_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("records.jsonl");
        let sink = JsonLinesSink::new(&path);
        sink.append(&[record(1)]).unwrap();
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "{{not json").unwrap();
        sink.append(&[record(2)]).unwrap();
        assert_eq!(sink.history().unwrap().len(), 2);
    }

    #[test]
    fn test_result_files() {
        let dir = TempDir::new().unwrap();
        let sink = JsonLinesResultSink::new(dir.path().join("scores.jsonl"), dir.path().join("forecasts.jsonl"));
        let score = AnomalyScore {
            sensor_id: SensorId::from("bog-3"),
            datetime: Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
            score: 0.61,
            model_version: 2,
        };
        sink.write_scores(&[score.clone()]).unwrap();
        sink.write_forecasts(&[]).unwrap();
        assert_eq!(sink.read_scores().unwrap(), vec![score]);
        assert!(sink.read_forecasts().unwrap().is_empty());
        assert!(!dir.path().join("forecasts.jsonl").exists());
    }

    #[test]
    fn test_append_new_skips_stored_records() {
        let dir = TempDir::new().unwrap();
        let sink = JsonLinesSink::new(dir.path().join("records.jsonl"));
        assert_eq!(sink.append_new(&[record(1), record(2)]).unwrap(), 2);
        assert_eq!(sink.append_new(&[record(2), record(3), record(3)]).unwrap(), 1);
        assert_eq!(sink.history().unwrap(), vec![record(1), record(2), record(3)]);
    }

    #[test]
    fn test_correction_is_a_new_row() {
        let sink = MemorySink::with_records(vec![record(1)]);
        let mut corrected = record(1);
        corrected.measurements[0].quality = seaguard_core::QualityFlag::Suspect;
        assert_eq!(sink.append_new(&[record(1), corrected]).unwrap(), 1);
        assert_eq!(CanonicalSink::history(&sink).unwrap().len(), 2);
    }

    #[test]
    fn test_memory_sink() {
        let sink = MemorySink::with_records(vec![record(1)]);
        sink.append(&[record(2)]).unwrap();
        assert_eq!(CanonicalSink::history(&sink).unwrap().len(), 2);
        assert!(sink.scores().is_empty());
    }
}
