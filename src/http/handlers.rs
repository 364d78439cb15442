use super::state::AppState;
use crate::error::VoiceError;
use crate::storage::{HistoryMessage, QueuedMessage, DEFAULT_HISTORY_LIMIT};
use crate::voice::{Session, VoiceStateView};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct ConnectRequest {
    /// Optional room name (if not provided, one is generated)
    pub room_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SpeakRequest {
    pub text: String,
    /// Optional voice; legacy names are normalized
    pub voice: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: String,
    pub state: VoiceStateView,
}

#[derive(Debug, Serialize)]
pub struct PermissionResponse {
    pub granted: bool,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct SavedResponse {
    pub saved: bool,
}

#[derive(Debug, Deserialize)]
pub struct EnqueueRequest {
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: VoiceError,
}

/// Typed failure rendered as `{ "error": { "type": ..., ... } }`
pub struct ApiError(VoiceError);

impl From<VoiceError> for ApiError {
    fn from(err: VoiceError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            VoiceError::StorageValidation { .. } => StatusCode::BAD_REQUEST,
            VoiceError::Permission { .. } => StatusCode::FORBIDDEN,
            VoiceError::Connection { .. } | VoiceError::Synthesis { .. } => StatusCode::BAD_GATEWAY,
            VoiceError::StorageIo { .. } => StatusCode::SERVICE_UNAVAILABLE,
        };
        (status, Json(ErrorResponse { error: self.0 })).into_response()
    }
}

fn status(state: &AppState, status: &str) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: status.to_string(),
        state: state.orchestrator.snapshot().view(),
    })
}

// ============================================================================
// Voice handlers
// ============================================================================

/// GET /voice/state
pub async fn get_voice_state(State(state): State<AppState>) -> Json<VoiceStateView> {
    Json(state.orchestrator.snapshot().view())
}

/// POST /voice/connect
pub async fn connect(
    State(state): State<AppState>,
    body: Option<Json<ConnectRequest>>,
) -> Result<Json<Session>, ApiError> {
    let req = body.map(|Json(req)| req).unwrap_or_default();

    let session = state.orchestrator.connect(req.room_name).await.map_err(|e| {
        error!("Failed to connect: {}", e);
        e
    })?;

    info!("Connected to room: {}", session.room_name);
    Ok(Json(session))
}

/// POST /voice/speak
pub async fn speak(
    State(state): State<AppState>,
    Json(req): Json<SpeakRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    state
        .orchestrator
        .speak(&req.text, req.voice.as_deref())
        .await
        .map_err(|e| {
            error!("Failed to speak: {}", e);
            e
        })?;

    Ok(status(&state, "spoken"))
}

/// POST /voice/stop
pub async fn stop_speaking(State(state): State<AppState>) -> Json<StatusResponse> {
    state.orchestrator.stop_speaking().await;
    status(&state, "stopped")
}

/// POST /voice/disconnect
pub async fn disconnect(State(state): State<AppState>) -> Json<StatusResponse> {
    state.orchestrator.disconnect().await;
    status(&state, "disconnected")
}

/// POST /voice/microphone
pub async fn request_microphone(
    State(state): State<AppState>,
) -> Result<Json<PermissionResponse>, ApiError> {
    let granted = state.orchestrator.request_microphone_permission().await?;
    Ok(Json(PermissionResponse { granted }))
}

// ============================================================================
// Chat storage handlers
// ============================================================================

/// GET /chat/history?limit=N
pub async fn get_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Json<Vec<HistoryMessage>> {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    Json(state.store.recent_history(limit).await)
}

/// POST /chat/history
pub async fn append_history(
    State(state): State<AppState>,
    Json(message): Json<HistoryMessage>,
) -> Result<Json<SavedResponse>, ApiError> {
    let saved = state.store.append_history(&message).await?;
    Ok(Json(SavedResponse { saved }))
}

/// GET /chat/offline-queue
pub async fn get_offline_queue(
    State(state): State<AppState>,
) -> Result<Json<Vec<QueuedMessage>>, ApiError> {
    Ok(Json(state.store.drain_offline_queue().await?))
}

/// POST /chat/offline-queue
pub async fn enqueue_offline(
    State(state): State<AppState>,
    Json(req): Json<EnqueueRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let queued = state.store.enqueue_offline(&req.message).await?;
    Ok((StatusCode::CREATED, Json(queued)))
}

/// DELETE /chat/offline-queue
pub async fn clear_offline_queue(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state.store.clear_offline_queue().await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
