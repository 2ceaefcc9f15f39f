// 🌐 HTTP boundary for the Query Service
//
// Maps "empty result" to 404 and store failures to 500, and bounds the
// batch size. The lookups themselves live in query.rs.

use crate::error::CrosswalkError;
use crate::models::{OccupationData, RankEntry};
use crate::query::Store;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

/// Largest accepted batch lookup
pub const MAX_BATCH_SIZE: usize = 25;

/// Colon-style batch path still served for older clients. The router treats
/// `:` as a parameter marker, so this one is matched in the fallback.
pub const COLON_BATCH_PATH: &str = "/v1/mosids:batchLookup";

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: Store,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub detail: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BatchLookupRequest {
    pub mosid_codes: Vec<String>,
}

/// Only codes that were found appear in `results`
#[derive(Debug, Serialize, Deserialize)]
pub struct BatchLookupResponse {
    pub results: BTreeMap<String, OccupationData>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    InvalidRequest(String),
    Store(CrosswalkError),
}

impl From<CrosswalkError> for ApiError {
    fn from(err: CrosswalkError) -> Self {
        ApiError::Store(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            ApiError::NotFound(detail) => (StatusCode::NOT_FOUND, detail),
            ApiError::InvalidRequest(detail) => (StatusCode::UNPROCESSABLE_ENTITY, detail),
            ApiError::Store(err) => {
                error!(error = %err, "store lookup failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "The CAF Resume Helper dataset is unavailable.".to_string(),
                )
            }
        };
        (status, Json(ErrorBody { detail })).into_response()
    }
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// GET /v1/ranks/:rank_name
async fn read_rank(
    State(state): State<AppState>,
    Path(rank_name): Path<String>,
) -> Result<Json<RankEntry>, ApiError> {
    state.store.rank(&rank_name)?.map(Json).ok_or_else(|| {
        ApiError::NotFound(format!(
            "Rank {rank_name} is not present in the CAF Resume Helper dataset."
        ))
    })
}

/// GET /v1/mosids/:mosid_code
async fn read_mosid(
    State(state): State<AppState>,
    Path(mosid_code): Path<String>,
) -> Result<Json<OccupationData>, ApiError> {
    state.store.occupation(&mosid_code)?.map(Json).ok_or_else(|| {
        ApiError::NotFound(format!(
            "MOSID code {mosid_code} is not present in the CAF Resume Helper dataset."
        ))
    })
}

/// POST /v1/mosids/batch-lookup
async fn batch_mosid_lookup(
    State(state): State<AppState>,
    Json(request): Json<BatchLookupRequest>,
) -> Result<Json<BatchLookupResponse>, ApiError> {
    run_batch_lookup(&state, request)
}

/// POST /v1/mosids:batchLookup, anything else is a 404
async fn fallback(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    body: Bytes,
) -> Result<Json<BatchLookupResponse>, ApiError> {
    if method != Method::POST || uri.path() != COLON_BATCH_PATH {
        return Err(ApiError::NotFound("Not Found".to_string()));
    }

    let request: BatchLookupRequest = serde_json::from_slice(&body)
        .map_err(|err| ApiError::InvalidRequest(format!("invalid batch request: {err}")))?;
    run_batch_lookup(&state, request)
}

fn run_batch_lookup(
    state: &AppState,
    request: BatchLookupRequest,
) -> Result<Json<BatchLookupResponse>, ApiError> {
    let count = request.mosid_codes.len();
    if count == 0 || count > MAX_BATCH_SIZE {
        return Err(ApiError::InvalidRequest(format!(
            "mosid_codes must contain between 1 and {MAX_BATCH_SIZE} entries (got {count})"
        )));
    }

    let results = state
        .store
        .occupation_batch(&request.mosid_codes)?
        .into_iter()
        .filter_map(|(code, data)| data.map(|d| (code, d)))
        .collect();

    Ok(Json(BatchLookupResponse { results }))
}

/// Full application router
pub fn router(store: Store) -> Router {
    let state = AppState { store };

    Router::new()
        .route("/api/health", get(health_check))
        .route("/v1/ranks/:rank_name", get(read_rank))
        .route("/v1/mosids/batch-lookup", post(batch_mosid_lookup))
        .route("/v1/mosids/:mosid_code", get(read_mosid))
        .fallback(fallback)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
