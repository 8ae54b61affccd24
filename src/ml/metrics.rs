//! Regression error metrics in original price units.

use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

use crate::error::MetricsError;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub mae: f64,
    pub rmse: f64,
    /// `None` when a true value is zero and the percentage error is undefined.
    pub mape: Option<f64>,
    pub samples: usize,
}

fn check(y_true: &[f64], y_pred: &[f64]) -> Result<(), MetricsError> {
    if y_true.len() != y_pred.len() {
        return Err(MetricsError::LengthMismatch {
            truth: y_true.len(),
            predicted: y_pred.len(),
        });
    }
    if y_true.is_empty() {
        return Err(MetricsError::Empty);
    }
    Ok(())
}

/// Mean Absolute Error
pub fn mae(y_true: &[f64], y_pred: &[f64]) -> Result<f64, MetricsError> {
    check(y_true, y_pred)?;
    Ok(y_true
        .iter()
        .zip(y_pred)
        .map(|(t, p)| (t - p).abs())
        .collect::<Vec<f64>>()
        .mean())
}

/// Mean Squared Error
pub fn mse(y_true: &[f64], y_pred: &[f64]) -> Result<f64, MetricsError> {
    check(y_true, y_pred)?;
    Ok(y_true
        .iter()
        .zip(y_pred)
        .map(|(t, p)| (t - p).powi(2))
        .collect::<Vec<f64>>()
        .mean())
}

/// Root Mean Squared Error
pub fn rmse(y_true: &[f64], y_pred: &[f64]) -> Result<f64, MetricsError> {
    Ok(mse(y_true, y_pred)?.sqrt())
}

/// Mean Absolute Percentage Error, in percent.
pub fn mape(y_true: &[f64], y_pred: &[f64]) -> Result<f64, MetricsError> {
    check(y_true, y_pred)?;
    if let Some(index) = y_true.iter().position(|&t| t == 0.0) {
        return Err(MetricsError::ZeroTarget { index });
    }

    let ratios: Vec<f64> = y_true
        .iter()
        .zip(y_pred)
        .map(|(t, p)| ((t - p) / t).abs())
        .collect();
    Ok(ratios.mean() * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perfect_predictions() {
        let y = [21.5, 22.0, 19.75];
        assert_eq!(mae(&y, &y).unwrap(), 0.0);
        assert_eq!(rmse(&y, &y).unwrap(), 0.0);
        assert_eq!(mape(&y, &y).unwrap(), 0.0);
    }

    #[test]
    fn test_known_values() {
        let y_true = [10.0, 20.0, 40.0];
        let y_pred = [11.0, 18.0, 40.0];

        assert!((mae(&y_true, &y_pred).unwrap() - 1.0).abs() < 1e-12);
        assert!((rmse(&y_true, &y_pred).unwrap() - (5.0f64 / 3.0).sqrt()).abs() < 1e-12);
        // (10% + 10% + 0%) / 3
        assert!((mape(&y_true, &y_pred).unwrap() - 20.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_mape_zero_target() {
        assert_eq!(
            mape(&[1.0, 0.0], &[1.0, 0.5]),
            Err(MetricsError::ZeroTarget { index: 1 })
        );
    }

    #[test]
    fn test_rejects_empty_and_mismatched() {
        assert_eq!(mae(&[], &[]), Err(MetricsError::Empty));
        assert_eq!(
            rmse(&[1.0], &[1.0, 2.0]),
            Err(MetricsError::LengthMismatch { truth: 1, predicted: 2 })
        );
    }
}
