use thiserror::Error;

#[derive(Error, Debug)]
pub enum DataError {
    #[error("No data downloaded for {ticker}; check the ticker and date range")]
    EmptySeries { ticker: String },

    #[error("Market data request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("Market data API error [{code}]: {description}")]
    ApiError {
        code: String,
        description: String,
    },

    #[error("Failed to parse market data response: {0}")]
    ParseError(String),

    #[error("Invalid date range: {0}")]
    InvalidDateRange(String),

    #[error("Cannot scale price series: {0}")]
    Scaling(#[from] ScalerError),

    #[error("Not enough data: {available} points, need more than {required}")]
    InsufficientData {
        available: usize,
        required: usize,
    },
}

#[derive(Error, Debug, PartialEq)]
pub enum ScalerError {
    #[error("Cannot fit scaler on an empty series")]
    EmptySeries,

    #[error("Cannot fit scaler on non-finite value {0}")]
    NonFinite(f64),

    #[error("Degenerate scaler bounds: min {min} must be below max {max}")]
    DegenerateRange { min: f64, max: f64 },
}

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch {
        expected: String,
        actual: String,
    },

    #[error("Unsupported model configuration: {0}")]
    InvalidConfig(String),

    #[error("Training failed: {0}")]
    TrainingError(String),
}

#[derive(Error, Debug, PartialEq)]
pub enum MetricsError {
    #[error("Cannot compute metrics on an empty set")]
    Empty,

    #[error("Length mismatch: {truth} true values, {predicted} predictions")]
    LengthMismatch { truth: usize, predicted: usize },

    #[error("MAPE is undefined: true value at index {index} is zero")]
    ZeroTarget { index: usize },
}

/// Outcome of a failed `/predict` call, mapped to a status code in `web`.
#[derive(Error, Debug)]
pub enum PredictionError {
    #[error("History must contain at least {required} values")]
    InsufficientHistory { required: usize, actual: usize },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Inference failed: {0}")]
    Internal(String),
}

#[derive(Error, Debug)]
pub enum StartupError {
    #[error("Artifact not found at {0}; run the fetch and train stages first")]
    MissingArtifact(String),

    #[error("Failed to read artifact {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to deserialize artifact {path}: {source}")]
    Corrupt {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Incompatible model artifact: {0}")]
    IncompatibleModel(#[from] ModelError),
}
