//! Anomaly scoring
//!
//! Events are flattened into a fixed product layout, missing products are
//! filled with the training medians, and the isolation-forest path length
//! is normalised into a score:
//!
//! ```text
//! score = 2^(-E[h(x)] / c(n))
//! ```
//!
//! A score near 1 means the event was isolated quickly; around 0.5 means it
//! sits with the bulk of the training data.

use serde::{Deserialize, Serialize};

use seaguard_core::{CanonicalRecord, ModelTarget, Product, TimeWindow};

use crate::artifact::ModelArtifact;
use crate::forest::{ForestConfig, IsolationForest};
use crate::{MLError, MLResult};

/// Normalised anomaly score from an average path length
///
/// Returns 0.5 when the normaliser is degenerate (one training sample).
pub fn anomaly_score(average_path_length: f64, normalizer: f64) -> f64 {
    if normalizer <= 0.0 || !normalizer.is_finite() {
        return 0.5;
    }
    2f64.powf(-average_path_length / normalizer).clamp(0.0, 1.0)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    /// Event layout, one column per product
    pub products: Vec<Product>,
    pub forest: ForestConfig,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            products: vec![
                Product::Latitude,
                Product::Longitude,
                Product::WaterTemperature,
                Product::BatteryTemperature,
                Product::Depth,
                Product::WaterPressure,
                Product::BuoySpeed,
            ],
            forest: ForestConfig::default(),
        }
    }
}

impl AnomalyConfig {
    pub fn with_products(mut self, products: Vec<Product>) -> Self {
        self.products = products;
        self
    }

    pub fn with_forest(mut self, forest: ForestConfig) -> Self {
        self.forest = forest;
        self
    }
}

/// Isolation forest plus the layout and fill values it was trained with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyModel {
    pub products: Vec<Product>,
    /// Training median per product, used for missing values
    pub medians: Vec<f64>,
    pub forest: IsolationForest,
}

impl AnomalyModel {
    pub fn columns(&self) -> Vec<String> {
        self.products.iter().map(|p| p.name().to_string()).collect()
    }

    pub fn vectorize(&self, record: &CanonicalRecord) -> Vec<f64> {
        vectorize(&self.products, &self.medians, record)
    }

    /// Product layout, fill values and forest width agree
    pub fn check_layout(&self) -> MLResult<()> {
        let width = self.forest.num_features();
        if self.products.len() != width || self.medians.len() != width {
            return Err(MLError::CorruptArtifact(format!(
                "anomaly layout has {} products and {} medians for a {}-feature forest",
                self.products.len(),
                self.medians.len(),
                width
            )));
        }
        Ok(())
    }

    pub fn score(&self, record: &CanonicalRecord) -> MLResult<f64> {
        let path = self.forest.average_path_length(&self.vectorize(record))?;
        Ok(anomaly_score(path, self.forest.normalizer()))
    }
}

fn vectorize(products: &[Product], medians: &[f64], record: &CanonicalRecord) -> Vec<f64> {
    products
        .iter()
        .zip(medians)
        .map(|(product, median)| record.output_value(*product).unwrap_or(*median))
        .collect()
}

fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    Some(if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    })
}

/// Train an isolation-forest artifact over `records`
///
/// A product never present in the training data is filled with 0.0.
pub fn train_anomaly_model(records: &[CanonicalRecord], config: &AnomalyConfig) -> MLResult<ModelArtifact> {
    if config.products.is_empty() {
        return Err(MLError::InvalidConfig("anomaly model needs at least one product".into()));
    }
    if records.is_empty() {
        return Err(MLError::InsufficientData("no events to train the anomaly model".into()));
    }

    let medians: Vec<f64> = config
        .products
        .iter()
        .map(|product| {
            let mut present: Vec<f64> = records.iter().filter_map(|r| r.output_value(*product)).collect();
            median(&mut present).unwrap_or(0.0)
        })
        .collect();

    let samples: Vec<Vec<f64>> = records
        .iter()
        .map(|r| vectorize(&config.products, &medians, r))
        .collect();
    let forest = IsolationForest::fit(&samples, &config.forest)?;
    log::info!(
        "anomaly: trained {} trees on {} events x {} products",
        forest.num_trees(),
        samples.len(),
        config.products.len()
    );

    let hyperparameters = serde_json::to_value(&config.forest)?;
    let window = time_span(records);
    let model = AnomalyModel {
        products: config.products.clone(),
        medians,
        forest,
    };
    Ok(ModelArtifact::anomaly(model, hyperparameters).with_training_window(window))
}

fn time_span(records: &[CanonicalRecord]) -> Option<TimeWindow> {
    let first = records.iter().map(CanonicalRecord::datetime).min()?;
    let last = records.iter().map(CanonicalRecord::datetime).max()?;
    TimeWindow::new(first, last + chrono::Duration::seconds(1))
}

/// Inference over one anomaly artifact
#[derive(Debug, Clone)]
pub struct AnomalyScorer {
    artifact: ModelArtifact,
}

impl AnomalyScorer {
    pub fn new(artifact: ModelArtifact) -> MLResult<Self> {
        match artifact.anomaly_model() {
            Some(model) if artifact.target() == ModelTarget::Anomaly => model.check_layout()?,
            _ => {
                return Err(MLError::InvalidConfig(format!(
                    "artifact for '{}' is not an anomaly model",
                    artifact.target()
                )))
            }
        }
        Ok(Self { artifact })
    }

    /// Score in [0, 1] for one event
    pub fn score(&self, record: &CanonicalRecord) -> MLResult<f64> {
        match self.artifact.anomaly_model() {
            Some(model) => model.score(record),
            None => Err(MLError::InvalidConfig("scorer holds no anomaly model".into())),
        }
    }

    pub fn version(&self) -> u32 {
        self.artifact.version()
    }

    pub fn artifact(&self) -> &ModelArtifact {
        &self.artifact
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::c_factor;
    use chrono::{Duration, TimeZone, Utc};
    use seaguard_core::{Measurement, MeasurementEvent};

    fn reading(i: i64, temp: f64, battery: Option<f64>) -> CanonicalRecord {
        let when = Utc.with_ymd_and_hms(2024, 8, 1, 0, 0, 0).unwrap() + Duration::minutes(10 * i);
        let mut measurements = vec![Measurement::observed(Product::WaterTemperature, temp)];
        if let Some(b) = battery {
            measurements.push(Measurement::observed(Product::BatteryTemperature, b));
        }
        CanonicalRecord::new(MeasurementEvent::at_station("s-1", when), measurements)
    }

    fn history() -> Vec<CanonicalRecord> {
        (0..120)
            .map(|i| reading(i, 14.0 + (i % 7) as f64 * 0.05, Some(20.0 + (i % 3) as f64 * 0.1)))
            .collect()
    }

    fn config() -> AnomalyConfig {
        AnomalyConfig::default().with_products(vec![Product::WaterTemperature, Product::BatteryTemperature])
    }

    #[test]
    fn test_score_formula() {
        let c = c_factor(256);
        assert!((anomaly_score(c, c) - 0.5).abs() < 1e-12);
        assert!(anomaly_score(1.0, c) > 0.8);
        assert!(anomaly_score(2.0 * c, c) < 0.5);
        assert_eq!(anomaly_score(3.0, 0.0), 0.5);
    }

    #[test]
    fn test_outlier_scores_higher() {
        let scorer = AnomalyScorer::new(train_anomaly_model(&history(), &config()).unwrap()).unwrap();
        let normal = scorer.score(&reading(0, 14.1, Some(20.1))).unwrap();
        let outlier = scorer.score(&reading(0, 29.0, Some(45.0))).unwrap();
        assert!(outlier > normal, "outlier {outlier} <= normal {normal}");
        assert!((0.0..=1.0).contains(&outlier));
    }

    #[test]
    fn test_missing_product_uses_median() {
        let artifact = train_anomaly_model(&history(), &config()).unwrap();
        let model = artifact.anomaly_model().unwrap();
        let vector = model.vectorize(&reading(0, 14.0, None));
        assert_eq!(vector[0], 14.0);
        assert_eq!(vector[1], model.medians[1]);
        assert!((model.medians[1] - 20.1).abs() < 1e-9);
    }

    #[test]
    fn test_scoring_is_deterministic() {
        let records = history();
        let a = train_anomaly_model(&records, &config()).unwrap();
        let b = train_anomaly_model(&records, &config()).unwrap();
        let event = reading(3, 16.0, Some(19.0));
        assert_eq!(
            AnomalyScorer::new(a).unwrap().score(&event).unwrap(),
            AnomalyScorer::new(b).unwrap().score(&event).unwrap()
        );
    }

    #[test]
    fn test_truncated_layout_is_an_error() {
        let artifact = train_anomaly_model(&history(), &config()).unwrap();
        let mut model = artifact.anomaly_model().unwrap().clone();
        model.medians.pop();
        assert!(matches!(
            model.score(&reading(0, 14.0, Some(20.0))),
            Err(MLError::FeatureMismatch { expected: 2, found: 1 })
        ));
        assert!(matches!(model.check_layout(), Err(MLError::CorruptArtifact(_))));

        let tampered = ModelArtifact::anomaly(model, serde_json::Value::Null);
        assert!(matches!(AnomalyScorer::new(tampered), Err(MLError::CorruptArtifact(_))));
    }

    #[test]
    fn test_rejects_empty_inputs() {
        assert!(train_anomaly_model(&[], &config()).is_err());
        assert!(train_anomaly_model(&history(), &config().with_products(vec![])).is_err());
    }
}
