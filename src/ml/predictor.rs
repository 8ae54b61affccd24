use serde::de::DeserializeOwned;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

use super::model::LstmModel;
use super::scaler::MinMaxScaler;
use super::sequence::{InputTensor, Window, WINDOW_SIZE};
use crate::error::{ModelError, PredictionError, StartupError};

/// Next-close forecaster as seen by the HTTP layer.
pub trait Predictor: Send + Sync {
    /// Minimum number of closes `predict` accepts.
    fn window_size(&self) -> usize {
        WINDOW_SIZE
    }

    fn predict(&self, history: &[f64]) -> Result<f64, PredictionError>;
}

/// Trained model plus the scaler fitted alongside it. Both are read-only
/// once loaded.
#[derive(Debug, Clone)]
pub struct Forecaster {
    model: LstmModel,
    scaler: MinMaxScaler,
}

impl Forecaster {
    pub fn new(model: LstmModel, scaler: MinMaxScaler) -> Result<Self, StartupError> {
        model.validate_structure()?;
        if model.window_size() != WINDOW_SIZE {
            return Err(ModelError::ShapeMismatch {
                expected: format!("window of {}", WINDOW_SIZE),
                actual: format!("window of {}", model.window_size()),
            }
            .into());
        }

        Ok(Self { model, scaler })
    }

    /// Loads both artifacts; either one missing or malformed is fatal.
    pub fn load(model_path: &Path, scaler_path: &Path) -> Result<Self, StartupError> {
        for path in [model_path, scaler_path] {
            if !path.exists() {
                return Err(StartupError::MissingArtifact(path.display().to_string()));
            }
        }

        let model: LstmModel = read_artifact(model_path)?;
        let scaler: MinMaxScaler = read_artifact(scaler_path)?;
        let forecaster = Self::new(model, scaler)?;

        info!(
            "Model and scaler loaded (scaler bounds {:.4}..{:.4})",
            scaler.min(),
            scaler.max()
        );
        Ok(forecaster)
    }
}

impl Predictor for Forecaster {
    fn predict(&self, history: &[f64]) -> Result<f64, PredictionError> {
        let window = Window::latest(history).ok_or(PredictionError::InsufficientHistory {
            required: WINDOW_SIZE,
            actual: history.len(),
        })?;
        if let Some(bad) = window.values().iter().find(|v| !v.is_finite()) {
            return Err(PredictionError::InvalidInput(format!(
                "history contains non-finite value {}",
                bad
            )));
        }

        let scaled = window.map(|v| self.scaler.transform_value(v));
        let input = InputTensor::from(&scaled);

        let output = self
            .model
            .predict(&input)
            .map_err(|e| PredictionError::Internal(e.to_string()))?;
        let prediction = self.scaler.inverse_transform_value(output);

        if !prediction.is_finite() {
            return Err(PredictionError::Internal(format!(
                "model produced non-finite output {}",
                output
            )));
        }

        debug!("Predicted {:.4} from {} closes", prediction, history.len());
        Ok(prediction)
    }
}

fn read_artifact<T: DeserializeOwned>(path: &Path) -> Result<T, StartupError> {
    let content = fs::read_to_string(path).map_err(|source| StartupError::Io {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| StartupError::Corrupt {
        path: path.display().to_string(),
        source,
    })
}
