//! Forecast model families
//!
//! A forecast model holds one regressor per target output; location fits
//! latitude and longitude separately.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ensemble::{ForestParams, RandomForestRegressor};
use crate::features::{FeatureSpec, FeatureTable};
use crate::linear::LinearRegression;
use crate::{MLError, MLResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFamily {
    RandomForest,
    Linear,
    IsolationForest,
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ModelFamily::RandomForest => "random_forest",
            ModelFamily::Linear => "linear",
            ModelFamily::IsolationForest => "isolation_forest",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum Regressor {
    RandomForest(RandomForestRegressor),
    Linear(LinearRegression),
}

impl Regressor {
    pub fn predict(&self, row: &[f64]) -> f64 {
        match self {
            Regressor::RandomForest(forest) => forest.predict(row),
            Regressor::Linear(linear) => linear.predict(row),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastModel {
    pub spec: FeatureSpec,
    pub family: ModelFamily,
    /// Grid point of a random forest; `None` for linear models
    pub params: Option<ForestParams>,
    /// One regressor per output, in `ModelTarget::outputs` order
    pub regressors: Vec<Regressor>,
}

impl ForecastModel {
    pub fn fit_forest(table: &FeatureTable, params: ForestParams, seed: u64) -> MLResult<Self> {
        let x = checked_inputs(table)?;
        let regressors = (0..table.spec.outputs().len())
            .map(|j| {
                let y = table.output_column(j);
                RandomForestRegressor::fit(&x, &y, params, seed.wrapping_add((j as u64) << 32))
                    .map(Regressor::RandomForest)
            })
            .collect::<MLResult<Vec<_>>>()?;
        Ok(Self {
            spec: table.spec.clone(),
            family: ModelFamily::RandomForest,
            params: Some(params),
            regressors,
        })
    }

    pub fn fit_linear(table: &FeatureTable) -> MLResult<Self> {
        let x = checked_inputs(table)?;
        let regressors = (0..table.spec.outputs().len())
            .map(|j| LinearRegression::fit(&x, &table.output_column(j)).map(Regressor::Linear))
            .collect::<MLResult<Vec<_>>>()?;
        Ok(Self {
            spec: table.spec.clone(),
            family: ModelFamily::Linear,
            params: None,
            regressors,
        })
    }

    /// Predicted outputs for one input row
    pub fn predict(&self, inputs: &[f64]) -> MLResult<Vec<f64>> {
        let expected = self.spec.width();
        if inputs.len() != expected {
            return Err(MLError::FeatureMismatch {
                expected,
                found: inputs.len(),
            });
        }
        Ok(self.regressors.iter().map(|r| r.predict(inputs)).collect())
    }

    pub fn predict_table(&self, table: &FeatureTable) -> MLResult<Vec<Vec<f64>>> {
        table.rows.iter().map(|row| self.predict(&row.inputs)).collect()
    }
}

fn checked_inputs(table: &FeatureTable) -> MLResult<Vec<Vec<f64>>> {
    if table.is_empty() {
        return Err(MLError::InsufficientData(format!("no {} rows to fit", table.spec.target)));
    }
    let expected = table.spec.width();
    if let Some(row) = table.rows.iter().find(|r| r.inputs.len() != expected) {
        return Err(MLError::FeatureMismatch {
            expected,
            found: row.inputs.len(),
        });
    }
    Ok(table.inputs())
}
