mod serve;

pub use serve::{run_plain, run_tls};

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tokio::task;
use tracing::info;

use commit_log::{CommitLog, Error as LogError, Record};

use crate::auth::{
    AuthError, Authorizer, ACTION_APPEND, ACTION_READ, ACTION_RESET, OBJECT_LOGS,
};

/// Shared handles every request sees.
#[derive(Clone)]
pub struct AppState {
    pub log: Arc<CommitLog>,
    pub authorizer: Arc<Authorizer>,
}

/// The authenticated identity of a connection. Populated from the client
/// certificate during the TLS handshake; plain connections and clients
/// without a certificate run as `anonymous`.
#[derive(Clone, Debug)]
pub struct Peer {
    pub subject: String,
}

impl Peer {
    pub fn anonymous() -> Self {
        Peer {
            subject: "anonymous".to_string(),
        }
    }
}

/// Wire form of a record: JSON with the payload in base64.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ApiRecord {
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub offset: u64,
}

impl ApiRecord {
    fn from_record(record: &Record) -> Self {
        ApiRecord {
            value: BASE64.encode(&record.value),
            offset: record.offset,
        }
    }

    fn into_record(self) -> Result<Record, ApiError> {
        let value = BASE64
            .decode(self.value.as_bytes())
            .map_err(|e| ApiError::bad_request(format!("invalid base64 value: {e}")))?;
        Ok(Record::new(value))
    }
}

#[derive(Debug, Deserialize)]
struct ProduceRequest {
    record: ApiRecord,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProduceResponse {
    pub offset: u64,
}

#[derive(Debug, Deserialize)]
struct ConsumeParams {
    offset: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConsumeResponse {
    pub record: ApiRecord,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OffsetsResponse {
    pub lowest: u64,
    pub highest: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResetResponse {
    pub reset: String,
}

/// The commit log's HTTP surface: produce, consume, offsets, reset.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", post(produce).get(consume).delete(reset))
        .route("/offsets", get(offsets))
        .with_state(state)
}

async fn produce(
    State(state): State<AppState>,
    Extension(peer): Extension<Peer>,
    Json(req): Json<ProduceRequest>,
) -> Result<Json<ProduceResponse>, ApiError> {
    state
        .authorizer
        .authorize(&peer.subject, OBJECT_LOGS, ACTION_APPEND)?;

    let record = req.record.into_record()?;
    let log = Arc::clone(&state.log);
    let offset = task::spawn_blocking(move || log.append(record)).await??;
    Ok(Json(ProduceResponse { offset }))
}

async fn consume(
    State(state): State<AppState>,
    Extension(peer): Extension<Peer>,
    Query(params): Query<ConsumeParams>,
) -> Result<Json<ConsumeResponse>, ApiError> {
    state
        .authorizer
        .authorize(&peer.subject, OBJECT_LOGS, ACTION_READ)?;

    let log = Arc::clone(&state.log);
    let record = task::spawn_blocking(move || log.read(params.offset)).await??;
    Ok(Json(ConsumeResponse {
        record: ApiRecord::from_record(&record),
    }))
}

async fn offsets(
    State(state): State<AppState>,
    Extension(peer): Extension<Peer>,
) -> Result<Json<OffsetsResponse>, ApiError> {
    state
        .authorizer
        .authorize(&peer.subject, OBJECT_LOGS, ACTION_READ)?;

    Ok(Json(OffsetsResponse {
        lowest: state.log.lowest_offset()?,
        highest: state.log.highest_offset()?,
    }))
}

async fn reset(
    State(state): State<AppState>,
    Extension(peer): Extension<Peer>,
) -> Result<Json<ResetResponse>, ApiError> {
    state
        .authorizer
        .authorize(&peer.subject, OBJECT_LOGS, ACTION_RESET)?;

    info!(subject = %peer.subject, "resetting the log");
    let log = Arc::clone(&state.log);
    task::spawn_blocking(move || log.reset()).await??;
    Ok(Json(ResetResponse {
        reset: "ok".to_string(),
    }))
}

/// Error shape every handler funnels into: an HTTP status plus a JSON
/// body carrying the message.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: String) -> Self {
        ApiError {
            status: StatusCode::BAD_REQUEST,
            message,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "error": self.message }));
        (self.status, body).into_response()
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        let status = match err {
            AuthError::PermissionDenied { .. } => StatusCode::FORBIDDEN,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError {
            status,
            message: err.to_string(),
        }
    }
}

impl From<LogError> for ApiError {
    fn from(err: LogError) -> Self {
        let status = match err {
            // Invalid-argument fault: the offset is echoed in the message.
            LogError::OffsetOutOfRange(_) => StatusCode::BAD_REQUEST,
            LogError::Closed => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError {
            status,
            message: err.to_string(),
        }
    }
}

impl From<task::JoinError> for ApiError {
    fn from(err: task::JoinError) -> Self {
        ApiError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: err.to_string(),
        }
    }
}
