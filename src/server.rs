//! HTTP surface.
//!
//! ```text
//! POST   /chat            {message, session_id?} -> {reply, tools}
//! GET    /health
//! GET    /sessions
//! GET    /sessions/{id}
//! DELETE /sessions/{id}
//! ```
//!
//! Failures are returned as `{"error": {"kind", "message"}}` with a status
//! derived from the error kind.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Serialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::agent_core::AgentError;
use crate::commands::chat::{send_message, ChatReply, ChatRequest, ChatService};
use crate::commands::session::{self, SessionListItem, SessionView};

/// Shared application state.
pub struct AppState {
    pub chat: ChatService,
    /// Model name reported by `/health`.
    pub model: String,
}

impl AppState {
    pub fn new(chat: ChatService, model: &str) -> Self {
        Self {
            chat,
            model: model.to_string(),
        }
    }
}

// ─── Errors ─────────────────────────────────────────────────────────────────

/// Error body returned to clients.
#[derive(Debug)]
pub enum ApiError {
    Agent(AgentError),
    SessionNotFound(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Agent(e) => match e {
                AgentError::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
                AgentError::Configuration { .. } | AgentError::InvalidTurn { .. } => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
                AgentError::Connection { .. } | AgentError::Backend { .. } => {
                    StatusCode::BAD_GATEWAY
                }
                AgentError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            },
            ApiError::SessionNotFound(_) => StatusCode::NOT_FOUND,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ApiError::Agent(e) => e.kind(),
            ApiError::SessionNotFound(_) => "NotFound",
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Agent(e) => e.to_string(),
            ApiError::SessionNotFound(id) => format!("session '{id}' not found"),
        }
    }
}

impl From<AgentError> for ApiError {
    fn from(e: AgentError) -> Self {
        ApiError::Agent(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Agent(AgentError::InvalidRequest {
            reason: rejection.body_text(),
        })
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": {
                "kind": self.kind(),
                "message": self.message(),
            }
        });
        (self.status(), Json(body)).into_response()
    }
}

// ─── Router ─────────────────────────────────────────────────────────────────

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/chat", post(chat))
        .route("/health", get(health))
        .route("/sessions", get(list_sessions))
        .route("/sessions/{id}", get(get_session).delete(delete_session))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ─── Handlers ───────────────────────────────────────────────────────────────

async fn chat(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatReply>, ApiError> {
    let Json(request) = payload.map_err(|rejection| {
        tracing::warn!(error = %rejection.body_text(), "malformed chat request");
        ApiError::from(rejection)
    })?;
    match send_message(&state.chat, request).await {
        Ok(reply) => Ok(Json(reply)),
        Err(e) => {
            tracing::warn!(kind = e.kind(), error = %e, "chat request failed");
            Err(e.into())
        }
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    model: String,
    transport: String,
    sessions: usize,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        model: state.model.clone(),
        transport: state.chat.connector().describe(),
        sessions: state.chat.store().session_ids().len(),
    })
}

async fn list_sessions(State(state): State<Arc<AppState>>) -> Json<Vec<SessionListItem>> {
    Json(session::list_sessions(state.chat.store()))
}

async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SessionView>, ApiError> {
    session::get_session(state.chat.store(), &id)
        .map(Json)
        .ok_or(ApiError::SessionNotFound(id))
}

async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if session::delete_session(state.chat.store(), &id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::SessionNotFound(id))
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
