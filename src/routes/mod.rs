//! API routes

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;

use crate::core::{CartSummary, StoredMessage, TurnError};
use crate::AppState;

pub const SESSION_HEADER: &str = "x-session-id";
pub const INTENT_HEADER: &str = "x-intent";

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    store: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    /// Omitted on the first turn; a new session ID is issued
    #[serde(default)]
    pub session_id: Option<String>,
    /// Quick-action intent that skips classification
    #[serde(default)]
    pub intent: Option<String>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

type ApiError = (StatusCode, Json<ErrorBody>);

fn api_error(err: TurnError) -> ApiError {
    let (status, code) = match &err {
        TurnError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "invalid_argument"),
        TurnError::Memory(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
    };
    if status.is_server_error() {
        tracing::error!(error = %err, "Request failed");
    }
    (
        status,
        Json(ErrorBody {
            code,
            message: err.to_string(),
        }),
    )
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        store: state.store_name.clone(),
    })
}

/// Run a turn and stream the reply as plain text
async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Response, ApiError> {
    let session_id = request
        .session_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let turn = state
        .chat_engine
        .handle_turn(&session_id, &request.message, request.intent.as_deref())
        .await
        .map_err(api_error)?;

    let body = Body::from_stream(turn.stream.map(Ok::<_, Infallible>));
    let mut response = body.into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    if let Ok(value) = HeaderValue::from_str(&session_id) {
        headers.insert(SESSION_HEADER, value);
    }
    headers.insert(INTENT_HEADER, HeaderValue::from_static(turn.intent.as_str()));

    Ok(response)
}

async fn list_sessions(State(state): State<AppState>) -> Result<Json<Vec<String>>, ApiError> {
    let sessions = state.chat_engine.sessions().await.map_err(api_error)?;
    Ok(Json(sessions))
}

async fn session_cart(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<CartSummary>, ApiError> {
    let cart = state.chat_engine.cart(&session_id).await.map_err(api_error)?;
    Ok(Json(cart))
}

async fn session_messages(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<Vec<StoredMessage>>, ApiError> {
    let messages = state
        .chat_engine
        .transcript(&session_id)
        .await
        .map_err(api_error)?;
    Ok(Json(messages))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/chat", post(chat))
        .route("/sessions", get(list_sessions))
        .route("/sessions/:id/cart", get(session_cart))
        .route("/sessions/:id/messages", get(session_messages))
}
