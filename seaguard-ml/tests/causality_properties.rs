//! Property tests for feature causality and walk-forward ordering
//!
//! Tests:
//! - Every feature row only reads observations earlier than its target
//! - The forward split never puts a test row at or before a training row
//! - Walk-forward folds never validate on rows at or before their training rows
//! - Anomaly scores stay in [0, 1], from the formula and from a trained scorer

mod common;

use std::sync::OnceLock;

use proptest::prelude::*;
use seaguard_core::{CanonicalRecord, Measurement, MeasurementEvent, ModelTarget, Product};
use seaguard_ml::{
    anomaly_score, build_features, c_factor, sample_split, train_anomaly_model, AnomalyConfig, AnomalyScorer,
    FeatureSpec, ForestConfig, WalkForward,
};

fn scorer() -> &'static AnomalyScorer {
    static SCORER: OnceLock<AnomalyScorer> = OnceLock::new();
    SCORER.get_or_init(|| {
        let forest = ForestConfig {
            num_trees: 25,
            sample_size: 64,
            ..ForestConfig::default()
        };
        let artifact = train_anomaly_model(&common::fleet(2, 48), &AnomalyConfig::default().with_forest(forest))
            .unwrap();
        AnomalyScorer::new(artifact).unwrap()
    })
}

fn extreme_value() -> impl Strategy<Value = f64> {
    prop_oneof![
        -1e300f64..1e300,
        -50.0f64..50.0,
        Just(f64::MAX),
        Just(f64::MIN),
        Just(f64::MIN_POSITIVE),
        Just(0.0),
    ]
}

/// Any subset of products, including ones outside the anomaly layout
fn scored_event() -> impl Strategy<Value = CanonicalRecord> {
    proptest::collection::vec(
        (proptest::sample::select(Product::ALL.to_vec()), extreme_value()),
        0..12,
    )
    .prop_map(|values| {
        let measurements = values
            .into_iter()
            .map(|(product, value)| Measurement::observed(product, value))
            .collect();
        CanonicalRecord::new(MeasurementEvent::at_station("drifter", common::epoch()), measurements)
    })
}

fn forecast_target() -> impl Strategy<Value = ModelTarget> {
    proptest::sample::select(vec![ModelTarget::Location, ModelTarget::BatteryTemperature])
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn feature_rows_are_causal(
        target in forecast_target(),
        lag in 1usize..4,
        buoys in 1usize..4,
        reports in 2usize..40,
    ) {
        let records = common::fleet(buoys, reports);
        let spec = FeatureSpec::for_target(target).unwrap().with_lag_steps(lag);
        let table = build_features(&spec, &records).unwrap().table;

        for row in &table.rows {
            prop_assert!(row.is_causal());
            prop_assert_eq!(row.input_times.len(), lag);
            prop_assert_eq!(row.inputs.len(), spec.width());
            prop_assert!(row.inputs[0] > 0.0);
        }
        let expected = if reports > lag { buoys * (reports - lag) } else { 0 };
        prop_assert_eq!(table.len(), expected);
    }

    #[test]
    fn forward_split_is_strict(
        buoys in 1usize..4,
        reports in 3usize..30,
        fraction in 0.05f64..0.95,
    ) {
        let records = common::fleet(buoys, reports);
        let spec = FeatureSpec::for_target(ModelTarget::Location).unwrap();
        let table = build_features(&spec, &records).unwrap().table;
        let (train, test) = sample_split(&table, fraction);

        prop_assert_eq!(train.len() + test.len(), table.len());
        if let Some(last_train) = train.rows.iter().map(|r| r.time).max() {
            prop_assert!(test.rows.iter().all(|r| r.time > last_train));
        }
    }

    #[test]
    fn walk_forward_validates_later_rows(
        buoys in 1usize..4,
        reports in 12usize..40,
        folds in 1usize..5,
        min_train in 0.2f64..0.7,
    ) {
        let records = common::fleet(buoys, reports);
        let spec = FeatureSpec::for_target(ModelTarget::BatteryTemperature).unwrap();
        let table = build_features(&spec, &records).unwrap().table;

        if let Ok(splits) = WalkForward::new(folds, min_train).splits(&table) {
            let mut previous_end = 0;
            for fold in splits {
                prop_assert_eq!(fold.train.start, 0);
                prop_assert!(fold.train.end > previous_end);
                prop_assert_eq!(fold.validate.start, fold.train.end);
                prop_assert!(fold.validate.end <= table.len());
                let last_train = table.rows[fold.train.end - 1].time;
                prop_assert!(table.rows[fold.validate.clone()].iter().all(|r| r.time > last_train));
                previous_end = fold.train.end;
            }
        }
    }

    #[test]
    fn anomaly_scores_are_bounded(path in 0.0f64..200.0, n in 1usize..4096) {
        let score = anomaly_score(path, c_factor(n));
        prop_assert!((0.0..=1.0).contains(&score));
    }

    #[test]
    fn scorer_output_is_bounded_for_any_event(record in scored_event()) {
        let score = scorer().score(&record).unwrap();
        prop_assert!((0.0..=1.0).contains(&score), "score {} for {:?}", score, record.measurements);
    }
}

#[test]
fn missing_auxiliary_is_never_read_from_the_future() {
    // wind speed is absent at every third report; the lagged value must be
    // the most recent earlier wind reading, never the target event's own
    let records = common::drifting_buoy("solo", 12, 60, 3);
    let spec = FeatureSpec::for_target(ModelTarget::Location)
        .unwrap()
        .with_auxiliary(vec![Product::WindSpeed]);
    let table = build_features(&spec, &records).unwrap().table;

    for row in &table.rows {
        let lag_time = row.input_times[0];
        let expected = records
            .iter()
            .filter(|r| r.datetime() <= lag_time)
            .filter_map(|r| r.value_of(Product::WindSpeed))
            .last()
            .unwrap_or(0.0);
        assert_eq!(row.inputs[4], expected);
    }
}
