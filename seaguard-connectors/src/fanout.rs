//! Concurrent fetch across adapters
//!
//! Every adapter runs as an independent tokio task wrapped in
//! `tokio::time::timeout`. Outcomes come back in adapter order regardless of
//! completion order.

use std::sync::Arc;
use std::time::{Duration, Instant};

use seaguard_core::{PipelineError, SourceClass};
use seaguard_schemas::RawReading;

use crate::{ConnectorError, FetchQuery, FetchRaw};

/// Outcome of fetching one source
#[derive(Debug)]
pub struct SourceFetch {
    pub source: String,
    pub class: SourceClass,
    pub outcome: Result<Vec<RawReading>, PipelineError>,
    pub elapsed: Duration,
}

impl SourceFetch {
    pub fn readings(&self) -> Option<&[RawReading]> {
        self.outcome.as_deref().ok()
    }

    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Fetch from every adapter concurrently, each bounded by `timeout`
pub async fn fetch_all(
    adapters: &[Arc<dyn FetchRaw>],
    query: &FetchQuery,
    timeout: Duration,
) -> Vec<SourceFetch> {
    let handles: Vec<_> = adapters
        .iter()
        .map(|adapter| {
            let adapter = Arc::clone(adapter);
            let query = query.clone();
            tokio::spawn(async move {
                let started = Instant::now();
                let result = match tokio::time::timeout(timeout, adapter.fetch_raw(&query)).await {
                    Ok(result) => result,
                    Err(_) => Err(ConnectorError::Timeout(timeout)),
                };
                (result, started.elapsed())
            })
        })
        .collect();

    let mut outcomes = Vec::with_capacity(adapters.len());
    for (adapter, handle) in adapters.iter().zip(handles) {
        let name = adapter.name().to_string();
        let (result, elapsed) = match handle.await {
            Ok(done) => done,
            Err(e) => (Err(ConnectorError::Task(e.to_string())), Duration::ZERO),
        };

        let outcome = match result {
            Ok(readings) => {
                log::info!("{}: fetched {} readings in {:?}", name, readings.len(), elapsed);
                Ok(readings)
            }
            Err(e) => {
                log::warn!("{}: source unavailable: {}", name, e);
                Err(e.into_pipeline(&name))
            }
        };

        outcomes.push(SourceFetch {
            source: name,
            class: adapter.source_class(),
            outcome,
            elapsed,
        });
    }
    outcomes
}
