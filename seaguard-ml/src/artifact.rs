//! Versioned model artifacts
//!
//! On disk an artifact is two parts separated by the first newline:
//!
//! ```text
//! {"format_version":1,"target":"depth","version":3,...,"checksum":"9f2c…"}\n
//! {"kind":"forecast","spec":{...},"regressors":[...]}
//! ```
//!
//! The header is a single JSON line describing the model; the payload is the
//! serialized model itself. `checksum` is the SHA-256 of the payload bytes,
//! verified on every load. Header fields other than the checksum are
//! informational and never feed into prediction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use seaguard_core::{ModelTarget, TimeWindow};

use crate::model::{ForecastModel, ModelFamily};
use crate::scoring::AnomalyModel;
use crate::{MLError, MLResult};

/// Layout version of the header and payload
pub const ARTIFACT_FORMAT_VERSION: u32 = 1;

/// Mean metric increase when one input column is shuffled
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureImportance {
    pub column: String,
    pub mean: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactHeader {
    pub format_version: u32,
    pub target: ModelTarget,
    /// Assigned by the store at publish time; 0 until then
    pub version: u32,
    pub family: ModelFamily,
    pub hyperparameters: serde_json::Value,
    pub training_window: Option<TimeWindow>,
    pub cv_error: Option<f64>,
    pub feature_columns: Vec<String>,
    #[serde(default)]
    pub importances: Vec<FeatureImportance>,
    pub created_at: DateTime<Utc>,
    /// Hex SHA-256 of the payload
    pub checksum: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArtifactModel {
    Forecast(ForecastModel),
    Anomaly(AnomalyModel),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelArtifact {
    pub header: ArtifactHeader,
    pub model: ArtifactModel,
}

impl ModelArtifact {
    /// Unpublished artifact for a fitted forecast model
    pub fn forecast(model: ForecastModel) -> MLResult<Self> {
        let hyperparameters = match &model.params {
            Some(params) => serde_json::to_value(params)?,
            None => serde_json::Value::Null,
        };
        let header = ArtifactHeader {
            format_version: ARTIFACT_FORMAT_VERSION,
            target: model.spec.target,
            version: 0,
            family: model.family,
            hyperparameters,
            training_window: None,
            cv_error: None,
            feature_columns: model.spec.columns(),
            importances: Vec::new(),
            created_at: Utc::now(),
            checksum: String::new(),
        };
        Ok(Self {
            header,
            model: ArtifactModel::Forecast(model),
        })
    }

    /// Unpublished artifact for a fitted anomaly model
    pub fn anomaly(model: AnomalyModel, hyperparameters: serde_json::Value) -> Self {
        let header = ArtifactHeader {
            format_version: ARTIFACT_FORMAT_VERSION,
            target: ModelTarget::Anomaly,
            version: 0,
            family: ModelFamily::IsolationForest,
            hyperparameters,
            training_window: None,
            cv_error: None,
            feature_columns: model.columns(),
            importances: Vec::new(),
            created_at: Utc::now(),
            checksum: String::new(),
        };
        Self {
            header,
            model: ArtifactModel::Anomaly(model),
        }
    }

    pub fn with_training_window(mut self, window: Option<TimeWindow>) -> Self {
        self.header.training_window = window;
        self
    }

    /// Non-finite errors are recorded as absent
    pub fn with_cv_error(mut self, error: f64) -> Self {
        self.header.cv_error = error.is_finite().then_some(error);
        self
    }

    pub fn with_importances(mut self, importances: Vec<FeatureImportance>) -> Self {
        self.header.importances = importances;
        self
    }

    pub fn target(&self) -> ModelTarget {
        self.header.target
    }

    pub fn version(&self) -> u32 {
        self.header.version
    }

    pub fn forecast_model(&self) -> Option<&ForecastModel> {
        match &self.model {
            ArtifactModel::Forecast(model) => Some(model),
            ArtifactModel::Anomaly(_) => None,
        }
    }

    pub fn anomaly_model(&self) -> Option<&AnomalyModel> {
        match &self.model {
            ArtifactModel::Anomaly(model) => Some(model),
            ArtifactModel::Forecast(_) => None,
        }
    }

    /// Header line, newline, payload; the header checksum is recomputed
    pub fn to_bytes(&self) -> MLResult<Vec<u8>> {
        let payload = serde_json::to_vec(&self.model)?;
        let mut header = self.header.clone();
        header.checksum = payload_checksum(&payload);

        let mut out = serde_json::to_vec(&header)?;
        out.push(b'\n');
        out.extend_from_slice(&payload);
        Ok(out)
    }

    /// Parse and verify an artifact written by [`ModelArtifact::to_bytes`]
    pub fn from_bytes(bytes: &[u8]) -> MLResult<Self> {
        let split = bytes
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| MLError::CorruptArtifact("missing header line".into()))?;
        let (header_bytes, payload) = (&bytes[..split], &bytes[split + 1..]);

        let header: ArtifactHeader = serde_json::from_slice(header_bytes)
            .map_err(|e| MLError::CorruptArtifact(format!("header: {}", e)))?;
        if header.format_version != ARTIFACT_FORMAT_VERSION {
            return Err(MLError::CorruptArtifact(format!(
                "format version {} not supported (expected {})",
                header.format_version, ARTIFACT_FORMAT_VERSION
            )));
        }

        let actual = payload_checksum(payload);
        if actual != header.checksum {
            return Err(MLError::ChecksumMismatch {
                expected: header.checksum,
                actual,
            });
        }

        let model: ArtifactModel = serde_json::from_slice(payload)
            .map_err(|e| MLError::CorruptArtifact(format!("payload: {}", e)))?;
        let kind_matches = match &model {
            ArtifactModel::Forecast(m) => m.spec.target == header.target,
            ArtifactModel::Anomaly(_) => header.target == ModelTarget::Anomaly,
        };
        if !kind_matches {
            return Err(MLError::CorruptArtifact(format!(
                "payload does not match header target '{}'",
                header.target
            )));
        }
        Ok(Self { header, model })
    }
}

fn payload_checksum(payload: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload);
    hex::encode(hasher.finalize())
}
