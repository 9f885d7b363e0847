//! HTTP handlers: health, metrics, push upgrade, snapshot, mark-read and
//! the collaborator intake endpoints.

use axum::Json;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use tally_core::{
    Conversation, ConversationId, MessageCreated, ReadReceipt, SessionId, TallyError,
    UnreadSnapshot, UserId,
};
use tracing::{debug, warn};

use crate::health::{self, HealthResponse};
use crate::ingest::DeltaOutcome;
use crate::server::AppState;
use crate::store_retry::with_store_retry;
use crate::websocket::session::run_ws_session;

/// Header naming the push session a mark-read came from.
pub const SESSION_HEADER: &str = "x-tally-session";

/// JSON error body returned by every endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Whether retrying may succeed.
    pub retryable: bool,
}

/// Error wrapper mapping [`TallyError`] to an HTTP status.
#[derive(Debug)]
pub struct ApiError(TallyError);

impl From<TallyError> for ApiError {
    fn from(err: TallyError) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self.0 {
            TallyError::NotFound(_) => StatusCode::NOT_FOUND,
            TallyError::InvalidRequest(_) | TallyError::Protocol(_) => StatusCode::BAD_REQUEST,
            TallyError::TransientStore(_) => StatusCode::SERVICE_UNAVAILABLE,
            TallyError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(error = %self.0, %status, "request failed");
        }
        let body = ErrorBody {
            code: self.0.code().to_owned(),
            message: self.0.to_string(),
            retryable: self.0.is_retryable(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let connections = state.hub.connection_count().await;
    let users = state.hub.user_count().await;
    Json(health::health_check(
        state.start_time,
        connections,
        users,
        state.shutdown.is_shutting_down(),
    ))
}

/// GET /metrics
pub async fn metrics(State(state): State<AppState>) -> String {
    state.metrics.render()
}

/// Query for the push upgrade.
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// User the session is bound to.
    pub user: String,
}

/// GET /v1/ws?user=... (WebSocket upgrade)
pub async fn ws_upgrade(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    if query.user.is_empty() {
        return ApiError(TallyError::InvalidRequest("user must not be empty".into())).into_response();
    }
    if state.shutdown.is_shutting_down() {
        return (StatusCode::SERVICE_UNAVAILABLE, "shutting down").into_response();
    }
    if state.hub.connection_count().await >= state.max_connections {
        warn!(limit = state.max_connections, "connection limit reached");
        return (StatusCode::SERVICE_UNAVAILABLE, "too many connections").into_response();
    }

    let user = UserId::from(query.user);
    let session = SessionId::new();
    debug!(%user, %session, "upgrading push session");
    ws.on_upgrade(move |socket| async move {
        let shutdown = state.shutdown.token();
        let task = state.shutdown.spawn(run_ws_session(
            socket,
            user,
            session,
            state.sessions.clone(),
            shutdown,
        ));
        let _ = task.await;
    })
}

/// GET /v1/users/{user}/snapshot
pub async fn snapshot(
    Path(user): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<UnreadSnapshot>> {
    let user = UserId::from(user);
    let snapshot = with_store_retry("snapshot", || state.store.snapshot(&user)).await?;
    Ok(Json(snapshot))
}

/// POST /v1/users/{user}/conversations/{conversation}/read
pub async fn mark_read(
    Path((user, conversation)): Path<(String, String)>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> ApiResult<Json<ReadReceipt>> {
    let origin = headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(SessionId::from);
    let receipt = state
        .receipts
        .mark_read(&UserId::from(user), &ConversationId::from(conversation), origin)
        .await?;
    Ok(Json(receipt))
}

/// Body of POST /v1/conversations.
#[derive(Debug, Deserialize)]
pub struct CreateConversation {
    /// Conversation ID.
    pub id: ConversationId,
    /// The two participants.
    pub participants: [UserId; 2],
}

/// Response of POST /v1/conversations.
#[derive(Debug, Serialize)]
pub struct CreatedResponse {
    /// `false` when the conversation was already registered.
    pub created: bool,
}

/// POST /v1/conversations
pub async fn create_conversation(
    State(state): State<AppState>,
    Json(body): Json<CreateConversation>,
) -> ApiResult<(StatusCode, Json<CreatedResponse>)> {
    let [a, b] = body.participants;
    let created = state
        .ingestor
        .on_conversation_created(Conversation::new(body.id, a, b))?;
    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(CreatedResponse { created })))
}

/// POST /v1/messages
pub async fn message_created(
    State(state): State<AppState>,
    Json(message): Json<MessageCreated>,
) -> ApiResult<Json<DeltaOutcome>> {
    Ok(Json(state.ingestor.on_message_created(message).await?))
}
