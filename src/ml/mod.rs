pub mod metrics;
pub mod model;
pub mod optimizer;
pub mod predictor;
pub mod scaler;
pub mod sequence;
pub mod trainer;

pub use metrics::EvaluationReport;
pub use model::{LstmModel, ModelConfig};
pub use predictor::{Forecaster, Predictor};
pub use scaler::MinMaxScaler;
pub use sequence::{build_sequences, InputTensor, Sequences, Window, WINDOW_SIZE};
pub use trainer::{evaluate, run_training, Trainer, TrainingHistory, TrainingReport};
