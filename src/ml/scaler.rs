use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;

use crate::error::ScalerError;

/// Min-max scaler mapping a fitted price range onto [0, 1].
///
/// Bounds are fixed at construction. Both constructors reject ranges where
/// `max <= min`, so `transform` never divides by zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ScalerState")]
pub struct MinMaxScaler {
    min: f64,
    max: f64,
}

/// On-disk form of the scaler, validated before it becomes a `MinMaxScaler`.
#[derive(Debug, Clone, Copy, Deserialize)]
struct ScalerState {
    min: f64,
    max: f64,
}

impl TryFrom<ScalerState> for MinMaxScaler {
    type Error = ScalerError;

    fn try_from(state: ScalerState) -> Result<Self, Self::Error> {
        MinMaxScaler::from_bounds(state.min, state.max)
    }
}

impl MinMaxScaler {
    pub fn fit(series: &[f64]) -> Result<Self, ScalerError> {
        if series.is_empty() {
            return Err(ScalerError::EmptySeries);
        }
        if let Some(&bad) = series.iter().find(|v| !v.is_finite()) {
            return Err(ScalerError::NonFinite(bad));
        }

        let min = series.iter().copied().fold(f64::INFINITY, f64::min);
        let max = series.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        Self::from_bounds(min, max)
    }

    pub fn from_bounds(min: f64, max: f64) -> Result<Self, ScalerError> {
        if !min.is_finite() {
            return Err(ScalerError::NonFinite(min));
        }
        if !max.is_finite() {
            return Err(ScalerError::NonFinite(max));
        }
        if max <= min {
            return Err(ScalerError::DegenerateRange { min, max });
        }
        Ok(Self { min, max })
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    fn range(&self) -> f64 {
        self.max - self.min
    }

    pub fn transform_value(&self, value: f64) -> f64 {
        (value - self.min) / self.range()
    }

    pub fn inverse_transform_value(&self, scaled: f64) -> f64 {
        scaled * self.range() + self.min
    }

    pub fn transform(&self, values: &[f64]) -> Vec<f64> {
        values.iter().map(|&v| self.transform_value(v)).collect()
    }

    pub fn inverse_transform(&self, scaled: &[f64]) -> Vec<f64> {
        scaled.iter().map(|&s| self.inverse_transform_value(s)).collect()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        info!("Scaler saved to {}", path.display());
        Ok(())
    }
}
