use std::sync::Arc;
use std::time::Instant;

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use uuid::Uuid;

use crate::config::ServingMode;
use crate::error::ServingError;
use crate::metrics::{MetricFile, MetricsCatalog, ModelSummary};
use crate::ml::{InferencePool, ModelRegistry, Predictor};
use crate::storage::{Ledger, DEFAULT_HISTORY_LIMIT};
use crate::types::{
    HistoryEntry, NewPredictionRequest, PredictionInput, PredictionResultRecord, PredictionStatus,
    PredictionView, SubmitReceipt,
};

pub const SERVICE_NAME: &str = "attrition-serving";
const DEFAULT_SOURCE: &str = "api";

#[derive(Clone)]
pub struct ApiState {
    pub mode: ServingMode,
    pub registry: Arc<ModelRegistry>,
    pub predictor: Arc<Predictor>,
    pub ledger: Arc<dyn Ledger>,
    pub pool: InferencePool,
    pub metrics: Arc<MetricsCatalog>,
}

// ============================================================================
// WIRE TYPES
// ============================================================================

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    mode: &'static str,
}

/// One shape for submit, poll and history; prediction fields stay `null` until completed.
#[derive(Debug, Serialize)]
pub struct PredictionResponse {
    pub request_id: Uuid,
    pub status: PredictionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub prediction: Option<u8>,
    pub probability: Option<f64>,
    pub model_name: Option<String>,
    pub model_version: Option<String>,
    pub latency_ms: Option<f64>,
}

impl PredictionResponse {
    fn pending(receipt: SubmitReceipt) -> Self {
        Self {
            request_id: receipt.request_id,
            status: receipt.status,
            created_at: receipt.created_at,
            updated_at: None,
            error_message: None,
            prediction: None,
            probability: None,
            model_name: None,
            model_version: None,
            latency_ms: None,
        }
    }

    fn from_view(view: PredictionView) -> Self {
        let mut response = Self {
            request_id: view.request_id,
            status: view.status,
            created_at: view.created_at,
            updated_at: view.updated_at,
            error_message: view.error_message,
            prediction: None,
            probability: None,
            model_name: None,
            model_version: None,
            latency_ms: None,
        };
        if let Some(result) = view.result {
            response.fill(result);
        }
        response
    }

    fn from_history(entry: HistoryEntry) -> Self {
        let mut response = Self {
            request_id: entry.request_id,
            status: PredictionStatus::Completed,
            created_at: entry.result.created_at,
            updated_at: None,
            error_message: None,
            prediction: None,
            probability: None,
            model_name: None,
            model_version: None,
            latency_ms: None,
        };
        response.fill(entry.result);
        response
    }

    fn fill(&mut self, result: PredictionResultRecord) {
        self.prediction = Some(result.prediction);
        self.probability = Some(result.probability);
        self.model_name = Some(result.model_name);
        self.model_version = Some(result.model_version);
        self.latency_ms = result.latency_ms;
    }
}

#[derive(Debug, Serialize)]
struct ModelsResponse {
    available_models: Vec<String>,
    default_model: String,
}

#[derive(Debug, Serialize)]
struct MetricsListResponse {
    metrics: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SubmitParams {
    model: Option<String>,
    model_name: Option<String>,
    source: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HistoryParams {
    limit: Option<u64>,
}

// ============================================================================
// ERRORS
// ============================================================================

pub struct ApiError(ServingError);

impl From<ServingError> for ApiError {
    fn from(value: ServingError) -> Self {
        Self(value)
    }
}

pub fn status_for(error: &ServingError) -> StatusCode {
    match error {
        ServingError::Validation { .. } | ServingError::InvalidCategory { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        ServingError::UnknownModel { .. } => StatusCode::BAD_REQUEST,
        ServingError::NotFound { .. } => StatusCode::NOT_FOUND,
        ServingError::Conflict { .. } => StatusCode::CONFLICT,
        ServingError::Unavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        ServingError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        ServingError::Storage { .. }
        | ServingError::Inference { .. }
        | ServingError::Artifact { .. }
        | ServingError::Config { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            log::error!("[API] {} {}", status.as_u16(), self.0);
        }
        (status, Json(json!({ "detail": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ============================================================================
// ROUTER
// ============================================================================

pub fn router(state: ApiState, cors_origin: &str) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/predictions/request", post(submit_prediction))
        .route("/predictions/history", get(prediction_history))
        .route("/predictions/:request_id", get(prediction_result))
        .route("/models", get(list_models))
        .route("/models/", get(list_models))
        .route("/metadata", get(metadata))
        .route("/metadata/", get(metadata))
        .route("/metrics", get(list_metrics))
        .route("/metrics/", get(list_metrics))
        .route("/metrics/summary", get(metrics_summary))
        .route("/metrics/:file", get(metric_file))
        .layer(cors_layer(cors_origin))
        .with_state(state)
}

pub async fn serve(
    addr: String,
    state: ApiState,
    cors_origin: String,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let app = router(state, &cors_origin);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    log::info!("[API] Listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health(State(state): State<ApiState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: SERVICE_NAME,
        mode: state.mode.as_str(),
    })
}

async fn submit_prediction(
    State(state): State<ApiState>,
    params: Result<Query<SubmitParams>, QueryRejection>,
    payload: Result<Json<PredictionInput>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<PredictionResponse>)> {
    let Json(input) = payload.map_err(|rejection| ServingError::validation(rejection.body_text()))?;
    let Query(params) =
        params.map_err(|rejection| ServingError::validation(rejection.body_text()))?;
    input.validate()?;

    let model_name = params
        .model
        .or(params.model_name)
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty() && name != "default")
        .unwrap_or_else(|| state.registry.default_model().to_string());
    // Unknown models are rejected before anything is written.
    state.registry.model_info(&model_name)?;
    let source = params
        .source
        .map(|source| source.trim().to_string())
        .filter(|source| !source.is_empty())
        .unwrap_or_else(|| DEFAULT_SOURCE.to_string());

    let request = NewPredictionRequest::new(input, model_name, source);
    let response = match state.mode {
        ServingMode::Deferred => {
            let receipt = state.ledger.submit(request).await?;
            log::info!("[API] Queued prediction {}", receipt.request_id);
            PredictionResponse::pending(receipt)
        }
        ServingMode::Inline => {
            let started = Instant::now();
            let prediction = state
                .pool
                .predict(
                    Arc::clone(&state.predictor),
                    request.input.to_payload(),
                    Some(request.model_name.clone()),
                )
                .await?;
            let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
            let view = state
                .ledger
                .record_completed(
                    request,
                    PredictionResultRecord::from_prediction(prediction, Some(latency_ms)),
                )
                .await?;
            log::info!("[API] Scored prediction {} inline", view.request_id);
            PredictionResponse::from_view(view)
        }
    };

    Ok((StatusCode::CREATED, Json(response)))
}

async fn prediction_result(
    State(state): State<ApiState>,
    request_id: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<Json<PredictionResponse>> {
    let Path(request_id) = request_id
        .map_err(|_| ServingError::validation("request_id must be a valid UUID"))?;
    let view = state.ledger.get_result(request_id).await?;
    Ok(Json(PredictionResponse::from_view(view)))
}

async fn prediction_history(
    State(state): State<ApiState>,
    params: Result<Query<HistoryParams>, QueryRejection>,
) -> ApiResult<Json<Vec<PredictionResponse>>> {
    let Query(params) = params
        .map_err(|_| ServingError::validation("limit must be an integer between 1 and 500"))?;
    let limit = params.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    let entries = state.ledger.list_recent(limit).await?;
    Ok(Json(
        entries
            .into_iter()
            .map(PredictionResponse::from_history)
            .collect(),
    ))
}

async fn list_models(State(state): State<ApiState>) -> ApiResult<Json<ModelsResponse>> {
    Ok(Json(ModelsResponse {
        available_models: state.registry.available_models()?,
        default_model: state.registry.default_model().to_string(),
    }))
}

async fn metadata(State(state): State<ApiState>) -> ApiResult<Json<Value>> {
    let metadata = state.registry.get_metadata()?;
    let document = serde_json::to_value(metadata)
        .map_err(|err| ServingError::artifact(format!("metadata not serializable: {err}")))?;
    Ok(Json(document))
}

async fn list_metrics(State(state): State<ApiState>) -> ApiResult<Json<MetricsListResponse>> {
    Ok(Json(MetricsListResponse {
        metrics: state.metrics.list_files()?,
    }))
}

async fn metrics_summary(State(state): State<ApiState>) -> ApiResult<Json<Vec<ModelSummary>>> {
    Ok(Json(state.metrics.summary()?))
}

async fn metric_file(
    State(state): State<ApiState>,
    Path(file): Path<String>,
) -> ApiResult<Json<MetricFile>> {
    Ok(Json(state.metrics.read_file(&file)?))
}

fn cors_layer(allowed: &str) -> CorsLayer {
    let cors = if allowed.trim() == "*" {
        CorsLayer::new().allow_origin(Any)
    } else {
        let origins = allowed
            .split(',')
            .filter_map(|origin| origin.trim().parse::<HeaderValue>().ok())
            .collect::<Vec<_>>();
        CorsLayer::new().allow_origin(AllowOrigin::list(origins))
    };

    cors.allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
}
