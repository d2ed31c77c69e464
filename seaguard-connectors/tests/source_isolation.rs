mod common;

use std::sync::Arc;
use std::time::Duration;

use seaguard_connectors::fixed::FixedStationAdapter;
use seaguard_connectors::wide_area::{GridBounds, WideAreaAdapter};
use seaguard_connectors::{fetch_all, AdapterConfig, FetchQuery, FetchRaw, SourceAdapter};
use seaguard_core::{ErrorKind, SourceClass};

use common::{one_day, ScriptedTransport, GAUGE_BODY, GRID_BODY};

fn bounds() -> GridBounds {
    GridBounds {
        min_lat: 41.0,
        max_lat: 41.5,
        min_lon: 289.5,
        max_lon: 290.0,
        stride: 1,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn slow_source_times_out_without_affecting_the_other() {
    let gauges = FixedStationAdapter::new(
        "gauges",
        "https://gauges.test/api",
        Arc::new(ScriptedTransport::new(GAUGE_BODY)),
    )
    .with_stations(["8454000"])
    .with_products(["water_level"]);

    let grid = WideAreaAdapter::new(
        "grid",
        "https://grid.test/oisst.json",
        bounds(),
        Arc::new(ScriptedTransport::new(GRID_BODY).with_delay(Duration::from_millis(400))),
    );

    let adapters: Vec<Arc<dyn FetchRaw>> = vec![Arc::new(gauges), Arc::new(grid)];
    let outcomes = fetch_all(&adapters, &FetchQuery::all(one_day()), Duration::from_millis(100)).await;

    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0].source, "gauges");
    assert_eq!(outcomes[0].class, SourceClass::FixedStation);
    assert_eq!(outcomes[0].readings().map(|r| r.len()), Some(2));

    let err = outcomes[1].outcome.as_ref().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SourceUnavailable);
    assert!(err.to_string().contains("grid"));
}

#[tokio::test]
async fn malformed_body_fails_only_its_source() {
    let gauges = FixedStationAdapter::new(
        "gauges",
        "https://gauges.test/api",
        Arc::new(ScriptedTransport::new("<html>maintenance</html>")),
    )
    .with_stations(["8454000"]);
    let grid = WideAreaAdapter::new(
        "grid",
        "https://grid.test/oisst.json",
        bounds(),
        Arc::new(ScriptedTransport::new(GRID_BODY)),
    );

    let adapters: Vec<Arc<dyn FetchRaw>> = vec![Arc::new(gauges), Arc::new(grid)];
    let outcomes = fetch_all(&adapters, &FetchQuery::all(one_day()), Duration::from_secs(5)).await;

    assert!(!outcomes[0].is_ok());
    let cells = outcomes[1].readings().unwrap();
    assert_eq!(cells.len(), 1);
    assert_eq!(cells[0].sensor_id, "41.125_289.875");
}

#[tokio::test]
async fn configured_adapters_fetch_through_the_closed_set() {
    let configs: Vec<AdapterConfig> = serde_json::from_str(
        r#"[
            {"kind":"fixed_station","name":"gauges","base_url":"https://gauges.test/api",
             "stations":["8454000"],"products":["water_level"]},
            {"kind":"wide_area","name":"grid","dataset_url":"https://grid.test/oisst.json",
             "bounds":{"min_lat":41.0,"max_lat":41.5,"min_lon":289.5,"max_lon":290.0}}
        ]"#,
    )
    .unwrap();

    let bodies = [GAUGE_BODY, GRID_BODY];
    let adapters: Vec<Arc<dyn FetchRaw>> = configs
        .iter()
        .zip(bodies)
        .map(|(config, body)| {
            let adapter =
                SourceAdapter::from_config(config, Arc::new(ScriptedTransport::new(body))).unwrap();
            Arc::new(adapter) as Arc<dyn FetchRaw>
        })
        .collect();

    let outcomes = fetch_all(&adapters, &FetchQuery::all(one_day()), Duration::from_secs(5)).await;
    assert!(outcomes.iter().all(|o| o.is_ok()));
    assert_eq!(outcomes[1].class, SourceClass::WideArea);
}
