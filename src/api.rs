use std::{net::SocketAddr, sync::Arc};

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::{
    controller::Controller, device_record::DeviceRecord,
    dispatcher::PowerLimitRequest, errors::PowerError,
};

pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid API key")]
    Auth,
    #[error("Invalid request format")]
    RequestFormat,
    #[error("Invalid GPU index")]
    InvalidIndex,
    #[error("GPU index out of range")]
    NotFound,
    #[error(transparent)]
    Power(#[from] PowerError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Auth => StatusCode::UNAUTHORIZED,
            ApiError::RequestFormat | ApiError::InvalidIndex => {
                StatusCode::BAD_REQUEST
            }
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Power(PowerError::InvalidMode(_)) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Power(PowerError::Timeout(_)) => {
                StatusCode::GATEWAY_TIMEOUT
            }
            ApiError::Power(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            error!("API request failed: {}", self);
        }

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Clone)]
pub struct ApiState {
    controller: Controller,
    api_key: Arc<str>,
}

impl ApiState {
    pub fn new(controller: Controller, api_key: &str) -> Self {
        Self {
            controller,
            api_key: Arc::from(api_key),
        }
    }
}

pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/api/gpus", get(list_gpus))
        .route("/api/gpus/{index}", get(get_gpu))
        .route("/api/power", post(set_power_limits))
        .layer(middleware::from_fn_with_state(state.clone(), require_api_key))
        .with_state(state)
}

// Serve the API until the token is cancelled
pub async fn serve(
    state: ApiState,
    port: u16,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;

    info!("Starting API server on port {}", port);

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

// Every route requires the configured key, checked before any GPU access
async fn require_api_key(
    State(state): State<ApiState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let valid = !state.api_key.is_empty()
        && req
            .headers()
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v == &*state.api_key);

    if !valid {
        return Err(ApiError::Auth);
    }

    Ok(next.run(req).await)
}

// GET /api/gpus
async fn list_gpus(
    State(state): State<ApiState>,
) -> Result<Json<Vec<DeviceRecord>>, ApiError> {
    Ok(Json(state.controller.refresh().await?))
}

// GET /api/gpus/{index}
async fn get_gpu(
    State(state): State<ApiState>,
    Path(index): Path<String>,
) -> Result<Json<DeviceRecord>, ApiError> {
    let index: i64 = index.parse().map_err(|_| ApiError::InvalidIndex)?;

    let records = state.controller.refresh().await?;

    usize::try_from(index)
        .ok()
        .and_then(|index| records.get(index).cloned())
        .map(Json)
        .ok_or(ApiError::NotFound)
}

// POST /api/power
async fn set_power_limits(
    State(state): State<ApiState>,
    body: Bytes,
) -> Result<Json<Vec<DeviceRecord>>, ApiError> {
    let request: PowerLimitRequest =
        serde_json::from_slice(&body).map_err(|_| ApiError::RequestFormat)?;

    let outcome = state.controller.apply(request).await?;

    Ok(Json(outcome.updated))
}
