//! HTTP route definitions

use axum::{
    extract::{Extension, State},
    http::{header, Method, StatusCode},
    middleware,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::error;
use uuid::Uuid;

use crate::app::AppState;
use crate::http::middleware::{require_auth, AuthenticatedUser};
use crate::store::matches::MatchRow;
use crate::store::StoreError;
use crate::util::time::uptime_secs;
use crate::ws::handler::ws_handler;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    // CORS configuration - support multiple origins (comma-separated)
    let allowed_origins: Vec<header::HeaderValue> = state
        .config
        .client_origin
        .split(',')
        .filter_map(|s| s.trim().parse::<header::HeaderValue>().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(allowed_origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true);

    // Public routes (auth happens at the WS layer for /ws)
    let public_routes = Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler));

    // Protected routes
    let protected_routes = Router::new()
        .route("/matches", get(list_matches_handler).post(create_match_handler))
        .route("/matches/join", post(join_by_code_handler))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    active_matches: usize,
    active_players: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        active_matches: state.registry.active_matches(),
        active_players: state.registry.total_players(),
    })
}

// ============================================================================
// Match endpoints
// ============================================================================

#[derive(Deserialize)]
struct CreateMatchRequest {
    #[serde(default = "default_public")]
    is_public: bool,
    #[serde(default)]
    is_solo: bool,
}

fn default_public() -> bool {
    true
}

#[derive(Serialize)]
struct MatchResponse {
    id: Uuid,
    code: String,
    host_id: Uuid,
    status: String,
    is_public: bool,
    is_solo: bool,
    inserted_at: DateTime<Utc>,
}

impl From<MatchRow> for MatchResponse {
    fn from(row: MatchRow) -> Self {
        Self {
            id: row.id,
            code: row.code,
            host_id: row.host_id,
            status: row.status,
            is_public: row.is_public,
            is_solo: row.is_solo,
            inserted_at: row.inserted_at,
        }
    }
}

/// Create the match row and start its actor. The creator then connects to
/// `/ws?match_id=...` to actually join.
async fn create_match_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Json(req): Json<CreateMatchRequest>,
) -> Result<Json<MatchResponse>, AppError> {
    let row = state
        .match_store
        .create_match(auth.user_id, req.is_public, req.is_solo)
        .await?;

    state
        .registry
        .start(row.id, row.code.clone(), row.host_id, row.is_solo);

    Ok(Json(row.into()))
}

#[derive(Serialize)]
struct MatchListResponse {
    matches: Vec<MatchResponse>,
}

async fn list_matches_handler(
    State(state): State<AppState>,
) -> Result<Json<MatchListResponse>, AppError> {
    let rows = state.match_store.list_available().await?;
    Ok(Json(MatchListResponse {
        matches: rows.into_iter().map(Into::into).collect(),
    }))
}

#[derive(Deserialize)]
struct JoinByCodeRequest {
    code: String,
}

/// Resolve a join code to match metadata; actual membership is taken on
/// the WebSocket.
async fn join_by_code_handler(
    State(state): State<AppState>,
    Json(req): Json<JoinByCodeRequest>,
) -> Result<Json<MatchResponse>, AppError> {
    let code = req.code.trim().to_ascii_uppercase();
    let row = state
        .match_store
        .find_by_code(&code)
        .await?
        .ok_or(AppError::NotFound("match_not_found"))?;

    if !state.registry.exists(&row.id) {
        // Row exists but the actor is gone (restart, janitor); treat as gone
        return Err(AppError::NotFound("match_not_found"));
    }

    Ok(Json(row.into()))
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    NotFound(&'static str),

    #[error("Internal error")]
    Store(#[from] StoreError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            AppError::NotFound(code) => (StatusCode::NOT_FOUND, code.to_string()),
            AppError::Store(e) => {
                error!(error = %e, "Store operation failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error".to_string())
            }
        };

        let body = serde_json::json!({ "error": message });
        (status, Json(body)).into_response()
    }
}
