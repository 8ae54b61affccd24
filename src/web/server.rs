use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

use crate::error::PredictionError;
use crate::ml::Predictor;

const STATUS_MESSAGE: &str = "Stock price prediction API is running";
const INTERNAL_ERROR_DETAIL: &str =
    "An internal error occurred while processing the prediction";

#[derive(Clone)]
pub struct PredictionServer {
    predictor: Arc<dyn Predictor>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusMessage {
    pub message: String,
}

/// Closing prices, oldest first; at least one full window is required.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockInput {
    pub history: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionOutput {
    pub prediction: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub detail: String,
}

impl PredictionServer {
    pub fn new(predictor: Arc<dyn Predictor>) -> Self {
        Self { predictor }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(read_root))
            .route("/predict", post(predict))
            .layer(TraceLayer::new_for_http())
            .with_state(self.clone())
    }

    pub async fn start(&self, host: &str, port: u16) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(format!("{}:{}", host, port)).await?;
        info!("Prediction API listening on http://{}:{}", host, port);

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("Prediction API stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    info!("Shutdown signal received, stopping server...");
}

impl IntoResponse for PredictionError {
    fn into_response(self) -> Response {
        let (status, detail) = match &self {
            PredictionError::InsufficientHistory { .. } | PredictionError::InvalidInput(_) => {
                debug!("Rejected prediction request: {}", self);
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            PredictionError::Internal(reason) => {
                error!("Prediction failed: {}", reason);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    INTERNAL_ERROR_DETAIL.to_string(),
                )
            }
        };

        (status, Json(ErrorBody { detail })).into_response()
    }
}

// API Handlers
async fn read_root() -> Json<StatusMessage> {
    Json(StatusMessage {
        message: STATUS_MESSAGE.to_string(),
    })
}

async fn predict(
    State(server): State<PredictionServer>,
    Json(input): Json<StockInput>,
) -> Result<Json<PredictionOutput>, PredictionError> {
    let predictor = server.predictor.clone();
    let history = input.history;
    if history.len() < predictor.window_size() {
        return Err(PredictionError::InsufficientHistory {
            required: predictor.window_size(),
            actual: history.len(),
        });
    }

    let prediction = tokio::task::spawn_blocking(move || predictor.predict(&history))
        .await
        .map_err(|e| PredictionError::Internal(format!("inference task failed: {}", e)))??;

    Ok(Json(PredictionOutput { prediction }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::{Forecaster, LstmModel, MinMaxScaler, ModelConfig};

    struct FailingPredictor;

    impl Predictor for FailingPredictor {
        fn predict(&self, _history: &[f64]) -> Result<f64, PredictionError> {
            Err(PredictionError::Internal(
                "matrix dimension mismatch at layer 2".to_string(),
            ))
        }
    }

    fn server() -> PredictionServer {
        let model = LstmModel::new(ModelConfig::default()).unwrap();
        let scaler = MinMaxScaler::from_bounds(15.0, 45.0).unwrap();
        PredictionServer::new(Arc::new(Forecaster::new(model, scaler).unwrap()))
    }

    async fn call(server: PredictionServer, history: Vec<f64>) -> Response {
        predict(State(server), Json(StockInput { history }))
            .await
            .into_response()
    }

    async fn body_json<T: for<'de> Deserialize<'de>>(response: Response) -> T {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_root_reports_status() {
        let response = read_root().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);

        let body: StatusMessage = body_json(response).await;
        assert!(!body.message.is_empty());
    }

    #[tokio::test]
    async fn test_predict_returns_price() {
        let history: Vec<f64> = (0..75).map(|i| 20.0 + (i % 7) as f64 * 0.5).collect();
        let response = call(server(), history).await;
        assert_eq!(response.status(), StatusCode::OK);

        let body: PredictionOutput = body_json(response).await;
        assert!(body.prediction.is_finite());
    }

    #[tokio::test]
    async fn test_predict_constant_history() {
        let response = call(server(), vec![30.0; 60]).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_short_history_is_bad_request() {
        let response = call(server(), vec![21.0; 10]).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body: ErrorBody = body_json(response).await;
        assert!(body.detail.contains("60"));
    }

    #[tokio::test]
    async fn test_short_history_rejected_before_inference() {
        let server = PredictionServer::new(Arc::new(FailingPredictor));
        let response = call(server, vec![21.0; 59]).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body: ErrorBody = body_json(response).await;
        assert_eq!(body.detail, "History must contain at least 60 values");
    }

    #[tokio::test]
    async fn test_routes_over_http() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let router = server().router();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        let client = reqwest::Client::new();

        let response = client.get(format!("{}/", base)).send().await.unwrap();
        assert_eq!(response.status().as_u16(), 200);
        let status: StatusMessage = response.json().await.unwrap();
        assert!(!status.message.is_empty());

        let response = client
            .post(format!("{}/predict", base))
            .json(&StockInput {
                history: vec![22.5; 59],
            })
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 400);
        let error: ErrorBody = response.json().await.unwrap();
        assert!(error.detail.contains("60"));

        let history: Vec<f64> = (0..60).map(|i| 20.0 + (i as f64 * 0.1).cos()).collect();
        let response = client
            .post(format!("{}/predict", base))
            .json(&StockInput { history })
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 200);
        let output: PredictionOutput = response.json().await.unwrap();
        assert!(output.prediction.is_finite());

        let response = client.get(format!("{}/predict", base)).send().await.unwrap();
        assert_eq!(response.status().as_u16(), 405);
    }

    #[tokio::test]
    async fn test_internal_failure_is_generic() {
        let server = PredictionServer::new(Arc::new(FailingPredictor));
        let response = call(server, vec![21.0; 60]).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body: ErrorBody = body_json(response).await;
        assert_eq!(body.detail, INTERNAL_ERROR_DETAIL);
        assert!(!body.detail.contains("matrix"));
    }
}
