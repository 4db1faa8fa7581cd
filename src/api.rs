//! REST API server for the cycle ledger
//!
//! Exposes the ledger entry points and the guided intake over HTTP for the
//! web UI. Handlers answer with the [`ApiResponse`] envelope, except
//! `/api/chat`, which keeps the web UI's flat `{ reply, history }` shape.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};

use crate::error::{ErrorBody, LedgerError};
use crate::intake::{IntakeCoordinator, IntakeOutcome, SessionCache};
use crate::models::{fields, Payload};
use crate::reply::{ReplyComposer, TemplateComposer};
use crate::repository::cycle_id_from;
use crate::state::LedgerService;

/// Turns of chat history handed back to the client
pub const CHAT_HISTORY_LIMIT: usize = 12;

/// Per-client chat session when the body carries no `sessionId`
pub const SESSION_HEADER: &str = "x-session-id";

const DEFAULT_CHAT_SEED: &str = "cycle-ledger-chat";

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntakeRequest {
    pub session_id: String,
    pub utterance: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub history: Vec<ChatTurn>,
    pub session_id: Option<String>,
}

/// Chat replies are not wrapped in [`ApiResponse`]: the web UI reads
/// `reply` and `history` at the top level.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub reply: String,
    pub history: Vec<ChatTurn>,
    pub intake: IntakeOutcome,
}

#[derive(Debug, Serialize)]
pub struct ChatError {
    pub error: String,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<Value>,
    pub error: Option<ErrorBody>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(error: ErrorBody) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

type ApiResult = (StatusCode, Json<ApiResponse>);

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub ledger: Arc<LedgerService>,
    pub intake: Arc<IntakeCoordinator>,
    pub composer: Arc<dyn ReplyComposer>,
}

impl ApiState {
    pub fn new(ledger: Arc<LedgerService>, sessions: SessionCache) -> Self {
        let intake = Arc::new(IntakeCoordinator::new(ledger.clone(), sessions));
        Self {
            ledger,
            intake,
            composer: Arc::new(TemplateComposer),
        }
    }

    pub fn with_composer(mut self, composer: Arc<dyn ReplyComposer>) -> Self {
        self.composer = composer;
        self
    }
}

/// =============================
/// Helpers
/// =============================

fn status_for(err: &LedgerError) -> StatusCode {
    match err {
        LedgerError::NotFound(_) => StatusCode::NOT_FOUND,
        LedgerError::AlreadyExists(_) => StatusCode::CONFLICT,
        e if e.is_domain() => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn failure(err: LedgerError) -> ApiResult {
    let status = status_for(&err);
    if status.is_server_error() {
        error!(error = %err, "Ledger request failed");
    } else {
        warn!(kind = err.kind(), error = %err, "Ledger request rejected");
    }
    (status, Json(ApiResponse::error(err.to_body())))
}

fn respond<T: Serialize>(result: crate::Result<T>, ok: StatusCode) -> ApiResult {
    match result {
        Ok(data) => (ok, Json(ApiResponse::success(data))),
        Err(err) => failure(err),
    }
}

fn bad_body(rejection: JsonRejection) -> ApiResult {
    warn!(error = %rejection.body_text(), "Malformed request body");
    (
        rejection.status(),
        Json(ApiResponse::error(ErrorBody {
            kind: "bad_request",
            field: None,
            message: rejection.body_text(),
        })),
    )
}

/// Path ids go through the same validation as body ids
fn path_id(raw: &str) -> crate::Result<u64> {
    let mut payload = Payload::new();
    payload.insert(fields::CYCLE_ID.to_string(), Value::String(raw.to_string()));
    cycle_id_from(&payload)
}

fn with_path_id(mut payload: Payload, raw: &str) -> crate::Result<Payload> {
    let id = path_id(raw)?;
    payload.insert(fields::CYCLE_ID.to_string(), Value::from(id));
    Ok(payload)
}

fn stable_uuid_from_string(input: &str) -> uuid::Uuid {
    use sha2::{Digest, Sha256};

    let hash = Sha256::digest(input.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&hash[..16]);

    // Set UUID version (4) and variant (RFC4122) bits.
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;

    uuid::Uuid::from_bytes(bytes)
}

/// Body id, then the session header, then one shared stable id.
/// Clients sending neither share a single wizard.
fn chat_session_id(requested: Option<&str>, headers: &HeaderMap) -> String {
    let non_blank = |id: &str| Some(id.trim()).filter(|id| !id.is_empty()).map(String::from);
    let header = headers
        .get(SESSION_HEADER)
        .and_then(|value| value.to_str().ok());

    requested
        .and_then(non_blank)
        .or_else(|| header.and_then(non_blank))
        .unwrap_or_else(|| stable_uuid_from_string(DEFAULT_CHAT_SEED).to_string())
}

/// =============================
/// Health Endpoint
/// =============================

async fn health() -> Json<Value> {
    Json(serde_json::json!({
        "ok": true,
        "name": env!("CARGO_PKG_NAME"),
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Cycle Endpoints
/// =============================

async fn list_cycles(State(state): State<ApiState>) -> ApiResult {
    respond(state.ledger.list_cycles().await, StatusCode::OK)
}

async fn get_cycle(State(state): State<ApiState>, Path(id): Path<String>) -> ApiResult {
    let result = match path_id(&id) {
        Ok(id) => state.ledger.get_cycle(id).await,
        Err(e) => Err(e),
    };
    respond(result, StatusCode::OK)
}

async fn create_cycle(
    State(state): State<ApiState>,
    body: Result<Json<Payload>, JsonRejection>,
) -> ApiResult {
    let Json(payload) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_body(rejection),
    };
    respond(state.ledger.create_cycle(&payload).await, StatusCode::CREATED)
}

async fn update_cycle(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    body: Result<Json<Payload>, JsonRejection>,
) -> ApiResult {
    let Json(payload) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_body(rejection),
    };
    let result = match with_path_id(payload, &id) {
        Ok(payload) => state.ledger.update_cycle(&payload).await,
        Err(e) => Err(e),
    };
    respond(result, StatusCode::OK)
}

async fn list_releases(State(state): State<ApiState>, Path(id): Path<String>) -> ApiResult {
    let result = match path_id(&id) {
        Ok(id) => state.ledger.releases_for(id).await,
        Err(e) => Err(e),
    };
    respond(result, StatusCode::OK)
}

async fn add_release(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    body: Result<Json<Payload>, JsonRejection>,
) -> ApiResult {
    let Json(payload) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_body(rejection),
    };
    let result = match with_path_id(payload, &id) {
        Ok(payload) => state
            .ledger
            .add_release(&payload)
            .await
            .map(|(release, cycle)| serde_json::json!({ "release": release, "cycle": cycle })),
        Err(e) => Err(e),
    };
    respond(result, StatusCode::CREATED)
}

/// =============================
/// Intake & Chat Endpoints
/// =============================

async fn advance_intake(
    State(state): State<ApiState>,
    body: Result<Json<IntakeRequest>, JsonRejection>,
) -> ApiResult {
    let Json(req) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_body(rejection),
    };
    if req.session_id.trim().is_empty() {
        return failure(LedgerError::validation("sessionId", "must not be blank"));
    }

    let outcome = state.intake.advance(req.session_id.trim(), &req.utterance).await;
    (StatusCode::OK, Json(ApiResponse::success(outcome)))
}

async fn chat_handler(
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match body {
        Ok(body) => body,
        Err(rejection) => {
            warn!(error = %rejection.body_text(), "Malformed chat request");
            let error = ChatError {
                error: rejection.body_text(),
            };
            return (rejection.status(), Json(error)).into_response();
        }
    };

    let session_id = chat_session_id(req.session_id.as_deref(), &headers);
    info!(session_id = %session_id, turns = req.history.len(), "Chat message received");

    let outcome = state.intake.advance(&session_id, &req.message).await;
    let reply = state.composer.compose(&outcome);

    let mut history = req.history;
    history.push(ChatTurn {
        role: "user".into(),
        content: req.message,
    });
    history.push(ChatTurn {
        role: "assistant".into(),
        content: reply.clone(),
    });
    if history.len() > CHAT_HISTORY_LIMIT {
        history.drain(..history.len() - CHAT_HISTORY_LIMIT);
    }

    Json(ChatResponse {
        reply,
        history,
        intake: outcome,
    })
    .into_response()
}

/// =============================
/// Router
/// =============================

pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/cycles", get(list_cycles).post(create_cycle))
        .route("/api/cycles/:id", get(get_cycle).patch(update_cycle))
        .route(
            "/api/cycles/:id/releases",
            get(list_releases).post(add_release),
        )
        .route("/api/intake", post(advance_intake))
        .route("/api/chat", post(chat_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    state: ApiState,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}
