use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::ml::model::ModelConfig;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub data: DataConfig,
    pub model: ModelConfig,
    pub training: TrainingConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DataConfig {
    pub ticker: String,
    pub start_date: String,
    pub end_date: String,
    pub data_dir: String,
    pub train_size: f64,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            ticker: "PETR4.SA".to_string(),
            start_date: "2015-01-01".to_string(),
            end_date: "2023-12-31".to_string(),
            data_dir: "data".to_string(),
            train_size: 0.8,
        }
    }
}

impl DataConfig {
    pub fn raw_data_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join(format!("{}_raw.json", self.ticker))
    }

    pub fn processed_data_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join(format!("{}_processed.json", self.ticker))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub batch_size: usize,
    pub validation_split: f64,
    pub shuffle: bool,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 25,
            batch_size: 32,
            validation_split: 0.1,
            shuffle: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub models_dir: String,
    pub model_file: String,
    pub scaler_file: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            models_dir: "models".to_string(),
            model_file: "lstm_model.json".to_string(),
            scaler_file: "scaler.json".to_string(),
        }
    }
}

impl ServerConfig {
    pub fn model_path(&self) -> PathBuf {
        PathBuf::from(&self.models_dir).join(&self.model_file)
    }

    pub fn scaler_path(&self) -> PathBuf {
        PathBuf::from(&self.models_dir).join(&self.scaler_file)
    }

    pub fn report_path(&self) -> PathBuf {
        PathBuf::from(&self.models_dir).join("training_report.json")
    }
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}
