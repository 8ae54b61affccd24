use anyhow::Result;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

use super::metrics::{self, EvaluationReport};
use super::model::{LstmModel, ModelConfig};
use super::optimizer::Adam;
use super::scaler::MinMaxScaler;
use super::sequence::Sequences;
use crate::config::{Config, TrainingConfig};
use crate::data::dataset::{load_json, Dataset};
use crate::error::ModelError;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochStats {
    pub epoch: usize,
    pub loss: f64,
    pub val_loss: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub epochs: Vec<EpochStats>,
}

impl TrainingHistory {
    pub fn final_loss(&self) -> Option<f64> {
        self.epochs.last().map(|e| e.loss)
    }
}

/// Written next to the model after a training run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    pub model: ModelConfig,
    pub training: TrainingConfig,
    pub history: TrainingHistory,
    pub evaluation: Option<EvaluationReport>,
    pub trained_at: chrono::DateTime<chrono::Utc>,
}

impl TrainingReport {
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        info!("Training report saved to {}", path.display());
        Ok(())
    }
}

pub struct Trainer {
    config: TrainingConfig,
    optimizer: Adam,
    rng: StdRng,
}

impl Trainer {
    pub fn new(config: TrainingConfig, model_config: &ModelConfig) -> Result<Self, ModelError> {
        if config.batch_size == 0 {
            return Err(ModelError::InvalidConfig("batch_size must be positive".to_string()));
        }
        if !(0.0..1.0).contains(&config.validation_split) {
            return Err(ModelError::InvalidConfig(format!(
                "validation_split {} outside [0, 1)",
                config.validation_split
            )));
        }

        Ok(Self {
            optimizer: Adam::new(model_config.learning_rate),
            // Offset so dropout/shuffle streams differ from weight init.
            rng: StdRng::seed_from_u64(model_config.seed.wrapping_add(1)),
            config,
        })
    }

    /// Mini-batch training. The trailing `validation_split` fraction of the
    /// samples is held out (never shuffled) and scored after every epoch.
    pub fn fit(
        &mut self,
        model: &mut LstmModel,
        x_train: &[Vec<f64>],
        y_train: &[f64],
    ) -> Result<TrainingHistory, ModelError> {
        if x_train.len() != y_train.len() {
            return Err(ModelError::ShapeMismatch {
                expected: format!("{} targets", x_train.len()),
                actual: format!("{} targets", y_train.len()),
            });
        }

        let split_at = ((x_train.len() as f64) * (1.0 - self.config.validation_split)) as usize;
        let (fit_x, val_x) = x_train.split_at(split_at);
        let (fit_y, val_y) = y_train.split_at(split_at);
        if fit_x.is_empty() {
            return Err(ModelError::TrainingError(format!(
                "no training samples left after validation split ({} total)",
                x_train.len()
            )));
        }

        info!(
            "Training on {} samples, validating on {} ({} epochs, batch size {})",
            fit_x.len(),
            val_x.len(),
            self.config.epochs,
            self.config.batch_size
        );

        let mut order: Vec<usize> = (0..fit_x.len()).collect();
        let mut history = TrainingHistory::default();

        for epoch in 1..=self.config.epochs {
            if self.config.shuffle {
                order.shuffle(&mut self.rng);
            }

            let mut weighted_loss = 0.0;
            for batch in order.chunks(self.config.batch_size) {
                let bx: Vec<Vec<f64>> = batch.iter().map(|&i| fit_x[i].clone()).collect();
                let by: Vec<f64> = batch.iter().map(|&i| fit_y[i]).collect();

                let (loss, grads) = model.gradients(&bx, &by, Some(&mut self.rng))?;
                if !loss.is_finite() {
                    return Err(ModelError::TrainingError(format!(
                        "loss diverged at epoch {}",
                        epoch
                    )));
                }
                self.optimizer.step(model.parameters_mut(), grads.tensors());
                weighted_loss += loss * batch.len() as f64;
            }

            let loss = weighted_loss / fit_x.len() as f64;
            let val_loss = if val_x.is_empty() {
                None
            } else {
                Some(model.loss(val_x, val_y)?)
            };

            match val_loss {
                Some(val) => info!(
                    "Epoch {}/{} - loss: {:.6} - val_loss: {:.6}",
                    epoch, self.config.epochs, loss, val
                ),
                None => info!("Epoch {}/{} - loss: {:.6}", epoch, self.config.epochs, loss),
            }

            history.epochs.push(EpochStats {
                epoch,
                loss,
                val_loss,
            });
        }

        debug!("Optimizer took {} steps", self.optimizer.steps_taken());
        Ok(history)
    }
}

/// Scores the model on held-out windows in original price units.
pub fn evaluate(
    model: &LstmModel,
    test: &Sequences,
    scaler: &MinMaxScaler,
) -> Result<EvaluationReport> {
    info!("Evaluating model on {} test samples", test.len());

    let predictions = scaler.inverse_transform(&model.predict_batch(&test.x)?);
    let truth = scaler.inverse_transform(&test.y);

    let mae = metrics::mae(&truth, &predictions)?;
    let rmse = metrics::rmse(&truth, &predictions)?;
    let mape = match metrics::mape(&truth, &predictions) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("MAPE not reported: {}", e);
            None
        }
    };

    info!("Test set metrics:");
    info!("  MAE:  {:.4}", mae);
    info!("  RMSE: {:.4}", rmse);
    match mape {
        Some(value) => info!("  MAPE: {:.2}%", value),
        None => info!("  MAPE: undefined"),
    }

    Ok(EvaluationReport {
        mae,
        rmse,
        mape,
        samples: truth.len(),
    })
}

/// Train stage: fit a fresh model on the processed dataset, persist it and
/// score it on the held-out windows.
pub fn run_training(config: &Config) -> Result<TrainingReport> {
    let dataset: Dataset = load_json(&config.data.processed_data_path())?;
    let scaler: MinMaxScaler = load_json(&config.server.scaler_path())?;
    if dataset.window_size != config.model.window_size {
        return Err(ModelError::ShapeMismatch {
            expected: format!("window of {}", config.model.window_size),
            actual: format!("dataset window of {}", dataset.window_size),
        }
        .into());
    }
    info!(
        "Loaded {} dataset: {} train / {} test windows",
        dataset.ticker,
        dataset.train.len(),
        dataset.test.len()
    );

    let mut model = LstmModel::new(config.model.clone())?;
    let mut trainer = Trainer::new(config.training.clone(), &config.model)?;
    let history = trainer.fit(&mut model, &dataset.train.x, &dataset.train.y)?;
    info!("Training finished");

    model.save(&config.server.model_path())?;

    let evaluation = evaluate(&model, &dataset.test, &scaler)?;
    let report = TrainingReport {
        model: model.config().clone(),
        training: config.training.clone(),
        history,
        evaluation: Some(evaluation),
        trained_at: chrono::Utc::now(),
    };
    report.save(&config.server.report_path())?;

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::sequence::build_sequences;

    fn small_model_config() -> ModelConfig {
        ModelConfig {
            window_size: 5,
            recurrent_width: 8,
            dense_hidden: 4,
            dropout_rate: 0.0,
            learning_rate: 0.01,
            ..ModelConfig::default()
        }
    }

    fn wave() -> Vec<f64> {
        (0..120)
            .map(|i| 0.5 + 0.4 * (i as f64 * 0.3).sin())
            .collect()
    }

    #[test]
    fn test_fit_reduces_loss() {
        let model_config = small_model_config();
        let mut model = LstmModel::new(model_config.clone()).unwrap();
        let data = build_sequences(&wave(), model_config.window_size);

        let training = TrainingConfig {
            epochs: 30,
            batch_size: 16,
            ..TrainingConfig::default()
        };
        let mut trainer = Trainer::new(training, &model_config).unwrap();
        let history = trainer.fit(&mut model, &data.x, &data.y).unwrap();

        assert_eq!(history.epochs.len(), 30);
        let first = history.epochs[0].loss;
        let last = history.final_loss().unwrap();
        assert!(last < first, "loss went from {} to {}", first, last);
        assert!(history.epochs.iter().all(|e| e.val_loss.is_some()));
    }

    #[test]
    fn test_no_validation_when_split_is_zero() {
        let model_config = small_model_config();
        let mut model = LstmModel::new(model_config.clone()).unwrap();
        let data = build_sequences(&wave(), model_config.window_size);

        let training = TrainingConfig {
            epochs: 2,
            validation_split: 0.0,
            ..TrainingConfig::default()
        };
        let mut trainer = Trainer::new(training, &model_config).unwrap();
        let history = trainer.fit(&mut model, &data.x, &data.y).unwrap();

        assert!(history.epochs.iter().all(|e| e.val_loss.is_none()));
    }

    #[test]
    fn test_rejects_invalid_settings() {
        let model_config = small_model_config();
        let zero_batch = TrainingConfig {
            batch_size: 0,
            ..TrainingConfig::default()
        };
        assert!(Trainer::new(zero_batch, &model_config).is_err());

        let mut trainer = Trainer::new(TrainingConfig::default(), &model_config).unwrap();
        let mut model = LstmModel::new(model_config).unwrap();
        assert!(trainer.fit(&mut model, &[], &[]).is_err());
    }

    #[test]
    fn test_evaluate_reports_price_units() {
        let model_config = small_model_config();
        let model = LstmModel::new(model_config.clone()).unwrap();
        let data = build_sequences(&wave(), model_config.window_size);
        let scaler = MinMaxScaler::from_bounds(10.0, 20.0).unwrap();

        let report = evaluate(&model, &data, &scaler).unwrap();
        assert_eq!(report.samples, data.len());
        assert!(report.mae.is_finite() && report.rmse >= report.mae);
        assert!(report.mape.is_some());
    }

    #[test]
    fn test_evaluate_skips_mape_on_zero_price() {
        let model_config = small_model_config();
        let model = LstmModel::new(model_config).unwrap();
        let scaler = MinMaxScaler::from_bounds(0.0, 10.0).unwrap();
        let test = Sequences {
            x: vec![vec![0.1, 0.2, 0.3, 0.4, 0.5]],
            y: vec![0.0],
        };

        let report = evaluate(&model, &test, &scaler).unwrap();
        assert_eq!(report.mape, None);
    }
}
