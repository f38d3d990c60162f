//! REST API route handlers.
//!
//! Provides endpoints for health, tool discovery, session management,
//! streamed chat turns and one-shot (non-streaming, unpersisted) chat.
//!
//! Chat turns answer with `text/event-stream`: one `data:` event per
//! [`StreamChunk`], serialized as JSON, ending with the `done` or `error`
//! chunk.

use std::convert::Infallible;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::mpsc;

use toolbridge_agent::{Message, StreamChunk};
use toolbridge_store::{Session, SessionMessage};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::mcp::McpToolDefinition;
use crate::state::AppState;

type ApiResult<T> = Result<T, ApiError>;

// ---------------------------------------------------------------------------
// GET /api/health
// ---------------------------------------------------------------------------

/// Response payload for the `/api/health` endpoint.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub database: bool,
    pub schema_version: Option<u32>,
    pub tool_count: usize,
    pub active_sessions: usize,
}

/// Liveness and database check. Needs no token.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let schema_version = match state.db.schema_version().await {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!(error = %e, "database health check failed");
            None
        }
    };

    Json(HealthResponse {
        status: if schema_version.is_some() {
            "ok"
        } else {
            "degraded"
        },
        version: env!("CARGO_PKG_VERSION"),
        database: schema_version.is_some(),
        schema_version,
        tool_count: state.registry().len(),
        active_sessions: state.conversations.active_sessions(),
    })
}

// ---------------------------------------------------------------------------
// GET /api/tools
// ---------------------------------------------------------------------------

pub async fn tools(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
) -> Json<Vec<McpToolDefinition>> {
    let tools = state
        .registry()
        .iter()
        .map(|d| McpToolDefinition {
            name: d.name().to_owned(),
            description: d.description().to_owned(),
            input_schema: d.input_schema().clone(),
            meta: d.metadata().clone(),
        })
        .collect();
    Json(tools)
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

/// Request body for `POST /api/sessions`.
#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    /// Defaults to the placeholder name, which makes the session eligible
    /// for an automatic title.
    #[serde(default)]
    pub name: Option<String>,
}

/// Request body for `PATCH /api/sessions/{id}`.
#[derive(Debug, Deserialize)]
pub struct RenameSessionRequest {
    pub name: String,
}

pub async fn list_sessions(
    State(state): State<Arc<AppState>>,
    AuthUser(auth): AuthUser,
) -> ApiResult<Json<Vec<Session>>> {
    Ok(Json(state.sessions.list_sessions(&auth.user_id).await?))
}

pub async fn create_session(
    State(state): State<Arc<AppState>>,
    AuthUser(auth): AuthUser,
    Json(body): Json<CreateSessionRequest>,
) -> ApiResult<impl IntoResponse> {
    let name = body
        .name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| state.conversations.config().default_session_name.clone());

    let session = state.sessions.create_session(&auth.user_id, &name).await?;
    tracing::info!(session_id = %session.id, user_id = %auth.user_id, "session created");
    Ok((StatusCode::CREATED, Json(session)))
}

pub async fn get_session(
    State(state): State<Arc<AppState>>,
    AuthUser(auth): AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Session>> {
    Ok(Json(state.sessions.get_session(&auth.user_id, &id).await?))
}

pub async fn rename_session(
    State(state): State<Arc<AppState>>,
    AuthUser(auth): AuthUser,
    Path(id): Path<String>,
    Json(body): Json<RenameSessionRequest>,
) -> ApiResult<Json<Session>> {
    let session = state
        .sessions
        .rename_session(&auth.user_id, &id, &body.name)
        .await?;
    Ok(Json(session))
}

pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    AuthUser(auth): AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    state.sessions.delete_session(&auth.user_id, &id).await?;
    Ok(Json(json!({ "deleted": true })))
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// Request body for `POST /api/sessions/{id}/messages`.
#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
}

/// Request body for `POST /api/sessions/{id}/redo`.
#[derive(Debug, Deserialize)]
pub struct RedoRequest {
    #[serde(default)]
    pub message_ids: Vec<i64>,
}

/// Request body for `DELETE /api/messages`.
#[derive(Debug, Deserialize)]
pub struct DeleteMessagesRequest {
    pub ids: Vec<i64>,
}

pub async fn get_session_messages(
    State(state): State<Arc<AppState>>,
    AuthUser(auth): AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<SessionMessage>>> {
    Ok(Json(state.sessions.get_messages(&auth.user_id, &id).await?))
}

/// Persist a user message and stream the answer.
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    AuthUser(auth): AuthUser,
    Path(id): Path<String>,
    Json(body): Json<SendMessageRequest>,
) -> ApiResult<impl IntoResponse> {
    let rx = state
        .conversations
        .send_message(auth, &id, &body.content)
        .await?;
    Ok(chunk_events(rx))
}

/// Delete the given messages and stream a fresh answer.
pub async fn redo(
    State(state): State<Arc<AppState>>,
    AuthUser(auth): AuthUser,
    Path(id): Path<String>,
    Json(body): Json<RedoRequest>,
) -> ApiResult<impl IntoResponse> {
    let rx = state
        .conversations
        .redo(auth, &id, &body.message_ids)
        .await?;
    Ok(chunk_events(rx))
}

pub async fn delete_messages(
    State(state): State<Arc<AppState>>,
    AuthUser(auth): AuthUser,
    Json(body): Json<DeleteMessagesRequest>,
) -> ApiResult<Json<Value>> {
    let deleted = state
        .sessions
        .delete_messages(&auth.user_id, &body.ids)
        .await?;
    Ok(Json(json!({ "deleted": deleted })))
}

// ---------------------------------------------------------------------------
// POST /api/chat
// ---------------------------------------------------------------------------

/// Request body for `POST /api/chat`.
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
}

/// Response payload for `POST /api/chat`.
#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub content: String,
    #[serde(rename = "_meta", skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub widget_id: Option<String>,
    pub iterations: u32,
}

/// Run the completion driver over the posted transcript. Nothing is
/// persisted.
pub async fn chat(
    State(state): State<Arc<AppState>>,
    AuthUser(auth): AuthUser,
    Json(body): Json<ChatRequest>,
) -> ApiResult<Json<ChatResponse>> {
    if body.messages.is_empty() {
        return Err(ApiError::BadRequest("messages must not be empty".into()));
    }

    let outcome = state
        .conversations
        .complete_once(&auth, body.messages)
        .await?;
    Ok(Json(ChatResponse {
        content: outcome.content,
        meta: outcome.meta,
        structured_content: outcome.structured_content,
        widget_id: outcome.widget_id,
        iterations: outcome.iterations,
    }))
}

// ---------------------------------------------------------------------------
// SSE
// ---------------------------------------------------------------------------

/// Forward every chunk from `rx` as an SSE event until the run ends.
///
/// When the client disconnects the response stream is dropped, which drops
/// `rx`; the producer notices at its next send and stops.
fn chunk_events(
    rx: mpsc::Receiver<StreamChunk>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let chunks = futures::stream::unfold(rx, |mut rx| async move {
        let chunk = rx.recv().await?;
        Some((chunk, rx))
    });

    let events = chunks.map(|chunk| {
        let json = serde_json::to_string(&chunk).unwrap_or_else(|e| {
            tracing::error!(error = %e, "failed to serialize chunk");
            r#"{"type":"error","message":"serialization failed"}"#.to_owned()
        });
        Ok::<_, Infallible>(Event::default().data(json))
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}
