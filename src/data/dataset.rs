use anyhow::Result;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;

use super::market::{MarketDataClient, PriceRecord};
use crate::config::Config;
use crate::error::DataError;
use crate::ml::scaler::MinMaxScaler;
use crate::ml::sequence::{build_sequences, Sequences};

/// Downloaded closes for one ticker, oldest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawSeries {
    pub ticker: String,
    pub records: Vec<PriceRecord>,
}

impl RawSeries {
    pub fn closes(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.close).collect()
    }
}

/// Scaled train/test windows ready for the trainer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub ticker: String,
    pub window_size: usize,
    pub train: Sequences,
    pub test: Sequences,
}

impl Dataset {
    /// Fits the scaler on the full series, windows the scaled values and
    /// splits them chronologically.
    pub fn prepare(
        ticker: &str,
        closes: &[f64],
        window_size: usize,
        train_size: f64,
    ) -> Result<(Self, MinMaxScaler), DataError> {
        if closes.is_empty() {
            return Err(DataError::EmptySeries {
                ticker: ticker.to_string(),
            });
        }

        let scaler = MinMaxScaler::fit(closes)?;
        let sequences = build_sequences(&scaler.transform(closes), window_size);
        let (train, test) = sequences.split(train_size);

        if train.is_empty() || test.is_empty() {
            return Err(DataError::InsufficientData {
                available: closes.len(),
                required: window_size + 1,
            });
        }

        info!(
            "Prepared {} training and {} test windows of length {}",
            train.len(),
            test.len(),
            window_size
        );

        Ok((
            Self {
                ticker: ticker.to_string(),
                window_size,
                train,
                test,
            },
            scaler,
        ))
    }
}

pub fn save_json<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_string(value)?)?;
    Ok(())
}

pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("cannot read {}: {}", path.display(), e))?;
    Ok(serde_json::from_str(&content)?)
}

/// Fetch stage: download, persist the raw series, then persist the
/// processed windows and the fitted scaler.
pub async fn run_pipeline(config: &Config) -> Result<Dataset> {
    let data = &config.data;
    let client = MarketDataClient::new()?;
    let records = client
        .fetch_daily_closes(&data.ticker, &data.start_date, &data.end_date)
        .await?;

    let raw = RawSeries {
        ticker: data.ticker.clone(),
        records,
    };
    save_json(&raw, &data.raw_data_path())?;
    info!("Raw data saved to {}", data.raw_data_path().display());

    let (dataset, scaler) = Dataset::prepare(
        &data.ticker,
        &raw.closes(),
        config.model.window_size,
        data.train_size,
    )?;

    save_json(&dataset, &data.processed_data_path())?;
    info!("Processed data saved to {}", data.processed_data_path().display());
    scaler.save(&config.server.scaler_path())?;

    Ok(dataset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn closes(n: usize) -> Vec<f64> {
        (1..=n).map(|v| v as f64).collect()
    }

    #[test]
    fn test_prepare_scales_and_splits() {
        let (dataset, scaler) = Dataset::prepare("TEST", &closes(100), 60, 0.8).unwrap();

        assert_eq!(scaler.min(), 1.0);
        assert_eq!(scaler.max(), 100.0);
        assert_eq!(dataset.train.len(), 32);
        assert_eq!(dataset.test.len(), 8);

        // Targets map back to the original closes.
        let first_target = scaler.inverse_transform_value(dataset.train.y[0]);
        assert!((first_target - 61.0).abs() < 1e-9);
        let last_target = scaler.inverse_transform_value(dataset.test.y[7]);
        assert!((last_target - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_prepare_rejects_short_or_empty_series() {
        assert!(matches!(
            Dataset::prepare("TEST", &[], 60, 0.8),
            Err(DataError::EmptySeries { .. })
        ));
        assert!(matches!(
            Dataset::prepare("TEST", &closes(60), 60, 0.8),
            Err(DataError::InsufficientData { .. })
        ));
    }

    #[test]
    fn test_prepare_rejects_constant_series() {
        assert!(matches!(
            Dataset::prepare("TEST", &[12.0; 100], 60, 0.8),
            Err(DataError::Scaling(_))
        ));
    }

    #[test]
    fn test_json_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("TEST_processed.json");

        let (dataset, _) = Dataset::prepare("TEST", &closes(80), 10, 0.8).unwrap();
        save_json(&dataset, &path).unwrap();
        let loaded: Dataset = load_json(&path).unwrap();
        assert_eq!(loaded, dataset);

        let raw = RawSeries {
            ticker: "TEST".to_string(),
            records: vec![PriceRecord {
                date: NaiveDate::from_ymd_opt(2023, 1, 2).unwrap(),
                close: 23.1,
            }],
        };
        assert_eq!(raw.closes(), vec![23.1]);
    }
}
