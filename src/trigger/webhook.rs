//! HTTP webhook producer.
//!
//! `POST /webhook` takes `{"issue_reference", "event_kind", "payload"}`.
//! When a secret is configured the raw body must carry an
//! `X-Adw-Signature: sha256=<hex hmac>` header; unauthenticated requests are
//! rejected before anything is parsed.

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use super::{
    Disposition, EventKind, EventSource, IgnoreReason, Ingestor, TriggerEvent, comment_event,
};
use crate::errors::{StoreError, TriggerError};
use crate::state::{IssueNumber, WorkflowId, WorkflowStore};

pub const SIGNATURE_HEADER: &str = "x-adw-signature";
const SIGNATURE_PREFIX: &str = "sha256=";

pub struct WebhookState {
    pub ingestor: Ingestor,
    pub store: Arc<dyn WorkflowStore>,
    pub secret: Option<String>,
    pub keyword: String,
}

pub type SharedState = Arc<WebhookState>;

// ── Errors ────────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(json!({"error": message}))).into_response()
    }
}

impl From<TriggerError> for ApiError {
    fn from(err: TriggerError) -> Self {
        match err {
            TriggerError::Malformed(msg) => ApiError::BadRequest(msg),
            TriggerError::Unauthenticated => {
                ApiError::Unauthorized(TriggerError::Unauthenticated.to_string())
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

// ── Payload ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum IssueRef {
    Number(u64),
    Text(String),
}

#[derive(Debug, Deserialize)]
struct WebhookPayload {
    issue_reference: IssueRef,
    event_kind: String,
    #[serde(default)]
    payload: Value,
}

impl WebhookPayload {
    fn issue(&self) -> Result<IssueNumber, TriggerError> {
        match &self.issue_reference {
            IssueRef::Number(n) => IssueNumber::try_from(*n).map_err(TriggerError::Malformed),
            IssueRef::Text(s) => s.parse().map_err(TriggerError::Malformed),
        }
    }

    /// Normalise into an event, or the reason this delivery does not count.
    fn into_event(self, keyword: &str) -> Result<Result<TriggerEvent, IgnoreReason>, TriggerError> {
        let issue = self.issue()?;
        let kind: EventKind = self.event_kind.parse().map_err(TriggerError::Malformed)?;
        let delivery = scalar(self.payload.get("delivery_id"));

        match kind {
            EventKind::Comment => {
                let body = self
                    .payload
                    .get("body")
                    .and_then(Value::as_str)
                    .ok_or_else(|| TriggerError::Malformed("comment payload needs a body".into()))?;
                let comment_id = scalar(self.payload.get("comment_id")).or(delivery);
                Ok(comment_event(
                    EventSource::Webhook,
                    issue,
                    comment_id.as_deref(),
                    body,
                    keyword,
                ))
            }
            _ => Ok(Ok(TriggerEvent::new(
                EventSource::Webhook,
                issue,
                kind,
                delivery.as_deref(),
            ))),
        }
    }
}

fn scalar(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// ── Signatures ────────────────────────────────────────────────────────

type HmacSha256 = Hmac<Sha256>;

fn mac_for(secret: &str, body: &[u8]) -> HmacSha256 {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(body);
    mac
}

/// `sha256=<hex>` signature of `body` under `secret`.
pub fn sign(secret: &str, body: &[u8]) -> String {
    let digest = mac_for(secret, body).finalize().into_bytes();
    format!("{}{}", SIGNATURE_PREFIX, hex::encode(digest))
}

/// Constant-time check of a signature header value. The `sha256=` prefix is
/// optional.
pub fn verify(secret: &str, body: &[u8], header: &str) -> bool {
    let given = header.trim();
    let given = given.strip_prefix(SIGNATURE_PREFIX).unwrap_or(given);
    let Ok(given) = hex::decode(given) else {
        return false;
    };
    mac_for(secret, body).verify_slice(&given).is_ok()
}

fn authenticate(state: &WebhookState, headers: &HeaderMap, body: &[u8]) -> Result<(), TriggerError> {
    let Some(secret) = state.secret.as_deref() else {
        return Ok(());
    };
    let header = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(TriggerError::Unauthenticated)?;
    if verify(secret, body, header) {
        Ok(())
    } else {
        Err(TriggerError::Unauthenticated)
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/webhook", post(receive_event))
        .route("/workflows/{id}", get(get_workflow))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "ok"
}

async fn receive_event(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    if let Err(e) = authenticate(&state, &headers, &body) {
        warn!("rejected webhook delivery with a missing or bad signature");
        return Err(e.into());
    }

    let payload: WebhookPayload = serde_json::from_slice(&body).map_err(|e| {
        warn!(error = %e, "discarding webhook delivery with an unreadable body");
        ApiError::BadRequest(format!("invalid payload: {}", e))
    })?;

    let normalized = payload.into_event(&state.keyword).inspect_err(|e| {
        warn!(error = %e, "discarding malformed webhook delivery");
    })?;
    let event = match normalized {
        Ok(event) => event,
        Err(reason) => {
            return Ok((
                StatusCode::OK,
                Json(json!({"status": "ignored", "reason": reason.as_str()})),
            ));
        }
    };

    info!(issue = %event.issue, kind = %event.kind, event_key = %event.event_key, "webhook event received");
    let disposition = state.ingestor.submit(event).await?;
    Ok(disposition_response(&disposition))
}

fn disposition_response(disposition: &Disposition) -> (StatusCode, Json<Value>) {
    match disposition {
        Disposition::Started(id) => (
            StatusCode::ACCEPTED,
            Json(json!({"status": "started", "workflow_id": id})),
        ),
        Disposition::Resumed(id) => (
            StatusCode::ACCEPTED,
            Json(json!({"status": "resumed", "workflow_id": id})),
        ),
        Disposition::Ignored {
            workflow_id,
            reason,
        } => (
            StatusCode::OK,
            Json(json!({
                "status": "ignored",
                "reason": reason.as_str(),
                "workflow_id": workflow_id,
            })),
        ),
    }
}

async fn get_workflow(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let workflow_id: WorkflowId = id.parse().map_err(ApiError::BadRequest)?;
    match state.store.load(&workflow_id) {
        Ok(record) => serde_json::to_value(record)
            .map(Json)
            .map_err(|e| ApiError::Internal(e.to_string())),
        Err(e @ StoreError::NotFound { .. }) => Err(ApiError::NotFound(e.to_string())),
        Err(e) => Err(ApiError::Internal(e.to_string())),
    }
}

/// Serve until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    state: SharedState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let addr = listener.local_addr()?;
    info!(%addr, "webhook listener started");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("Webhook server error")?;
    info!("webhook listener stopped");
    Ok(())
}
