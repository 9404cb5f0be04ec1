//! # REST + WebSocket API
//!
//! Builds the axum router that exposes the node's HTTP interface.
//! All endpoints share application state through axum's `State` extractor.
//!
//! ## Endpoints
//!
//! | Method | Path                            | Description                          |
//! |--------|---------------------------------|--------------------------------------|
//! | GET    | `/health`                       | Liveness probe                       |
//! | GET    | `/status`                       | Node status summary                  |
//! | GET    | `/tiers`                        | Configured tier table                |
//! | GET    | `/tiers/classify?amount=`       | Bucketed classification of an amount |
//! | POST   | `/deposits`                     | Push a deposit (webhook source only) |
//! | GET    | `/deposits/:id`                 | Deposit by id                        |
//! | GET    | `/wallets/:wallet/deposits`     | Deposits made by a wallet            |
//! | GET    | `/wallets/:wallet/attestations` | Attestations held by a wallet        |
//! | GET    | `/attestations/:id`             | Attestation by id                    |
//! | POST   | `/admin/mint`                   | Force-mint a stored deposit          |
//! | GET    | `/ws`                           | Live pipeline events                 |
//!
//! Attestation responses never carry an amount, and `/tiers/classify`
//! answers with the bucketed amount only.

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use tessera_core::admin::AdminError;
use tessera_core::config::PIPELINE_VERSION;
use tessera_core::minter::MintOutcome;
use tessera_core::pipeline::DepositPipeline;
use tessera_core::source::{SourceError, WebhookHandle};
use tessera_core::storage::{DepositStore, TesseraDB};
use tessera_core::tier::PrivacyTier;
use tessera_core::DepositEvent;

/// Header carrying the administrative credential.
pub const ADMIN_KEY_HEADER: &str = "x-admin-key";

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared application state available to all request handlers.
///
/// Cheap to clone. Everything is behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// The node's reported version string.
    pub version: String,
    /// Name of the running deposit source.
    pub source: String,
    pub pipeline: Arc<DepositPipeline>,
    /// Concrete store, for counts the `DepositStore` trait does not expose.
    pub db: Arc<TesseraDB>,
    /// Present only when the webhook source is running.
    pub webhook: Option<WebhookHandle>,
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the full axum [`Router`] with all API routes, CORS, and tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/tiers", get(tiers_handler))
        .route("/tiers/classify", get(classify_handler))
        .route("/deposits", post(submit_deposit_handler))
        .route("/deposits/:id", get(deposit_handler))
        .route("/wallets/:wallet/deposits", get(wallet_deposits_handler))
        .route("/wallets/:wallet/attestations", get(wallet_attestations_handler))
        .route("/attestations/:id", get(attestation_handler))
        .route("/admin/mint", post(admin_mint_handler))
        .route("/ws", get(ws_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request / Response Types
// ---------------------------------------------------------------------------

/// Response payload for `GET /status`.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Node software version.
    pub version: String,
    /// Pipeline version from the core library.
    pub pipeline_version: String,
    /// Running deposit source ("mock" or "webhook").
    pub source: String,
    /// Name of the minting capability in use.
    pub minter: String,
    pub auto_mint: bool,
    pub deposits: usize,
    pub processed_deposits: usize,
    pub attestations: usize,
    /// Whether `POST /admin/mint` can succeed at all.
    pub admin_enabled: bool,
    /// ISO-8601 timestamp of the response.
    pub timestamp: String,
}

#[derive(Debug, Deserialize)]
pub struct ClassifyQuery {
    pub amount: f64,
}

/// Public half of a tier assignment.
#[derive(Debug, Serialize, Deserialize)]
pub struct ClassifyResponse {
    pub tier: String,
    pub bucketed_amount: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub accepted: String,
}

/// Body of `POST /admin/mint`.
#[derive(Debug, Serialize, Deserialize)]
pub struct AdminMintRequest {
    pub recipient: String,
    pub deposit_id: String,
}

/// Generic error response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
        .into_response()
}

/// Extractor failures keep axum's status but use the JSON error body.
fn rejection_response(status: StatusCode, body_text: String) -> Response {
    tracing::debug!(%status, reason = %body_text, "request rejected");
    error_response(status, body_text)
}

fn storage_failure(e: impl std::fmt::Display) -> Response {
    tracing::error!(error = %e, "storage read failed");
    error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("storage error: {e}"))
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /health`: returns 200 if the node is alive.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

/// `GET /status`: counts come straight from storage.
async fn status_handler(State(state): State<AppState>) -> Response {
    let processed = match state.db.processed_count() {
        Ok(n) => n,
        Err(e) => return storage_failure(e),
    };

    Json(StatusResponse {
        version: state.version.clone(),
        pipeline_version: PIPELINE_VERSION.to_string(),
        source: state.source.clone(),
        minter: state.pipeline.minter().capability_name().to_string(),
        auto_mint: state.pipeline.config().auto_mint,
        deposits: state.db.deposit_count(),
        processed_deposits: processed,
        attestations: state.db.attestation_count(),
        admin_enabled: state.pipeline.admin_enabled(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
    .into_response()
}

async fn tiers_handler(State(state): State<AppState>) -> Json<Vec<PrivacyTier>> {
    Json(state.pipeline.tiers().tiers().to_vec())
}

/// `GET /tiers/classify?amount=`. The original amount is not echoed.
async fn classify_handler(
    State(state): State<AppState>,
    query: Result<Query<ClassifyQuery>, QueryRejection>,
) -> Response {
    let query = match query {
        Ok(Query(query)) => query,
        Err(rejection) => return rejection_response(rejection.status(), rejection.body_text()),
    };
    if !query.amount.is_finite() {
        return error_response(StatusCode::BAD_REQUEST, "amount must be a finite number");
    }
    let assignment = state.pipeline.tiers().classify(query.amount);
    Json(ClassifyResponse {
        tier: assignment.tier,
        bucketed_amount: assignment.bucketed_amount,
    })
    .into_response()
}

/// `POST /deposits`: hands the event to the webhook source. Processing is
/// asynchronous; follow `/ws` or poll `/deposits/:id` for the result.
async fn submit_deposit_handler(
    State(state): State<AppState>,
    payload: Result<Json<DepositEvent>, JsonRejection>,
) -> Response {
    let event = match payload {
        Ok(Json(event)) => event,
        Err(rejection) => return rejection_response(rejection.status(), rejection.body_text()),
    };
    let Some(webhook) = state.webhook.as_ref() else {
        return error_response(
            StatusCode::CONFLICT,
            format!("deposit source is '{}', not webhook", state.source),
        );
    };

    let id = event.id.clone();
    match webhook.submit(event).await {
        Ok(()) => (StatusCode::ACCEPTED, Json(SubmitResponse { accepted: id })).into_response(),
        Err(e @ (SourceError::Stopped | SourceError::ChannelClosed)) => {
            error_response(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
        }
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn deposit_handler(Path(id): Path<String>, State(state): State<AppState>) -> Response {
    match state.db.get_deposit(&id) {
        Ok(Some(deposit)) => Json(deposit).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, format!("deposit not found: {id}")),
        Err(e) => storage_failure(e),
    }
}

async fn wallet_deposits_handler(
    Path(wallet): Path<String>,
    State(state): State<AppState>,
) -> Response {
    match state.db.deposits_by_wallet(&wallet) {
        Ok(deposits) => Json(deposits).into_response(),
        Err(e) => storage_failure(e),
    }
}

async fn wallet_attestations_handler(
    Path(wallet): Path<String>,
    State(state): State<AppState>,
) -> Response {
    match state.db.attestations_by_wallet(&wallet) {
        Ok(attestations) => Json(attestations).into_response(),
        Err(e) => storage_failure(e),
    }
}

async fn attestation_handler(Path(id): Path<String>, State(state): State<AppState>) -> Response {
    match state.db.get_attestation(&id) {
        Ok(Some(attestation)) => Json(attestation).into_response(),
        Ok(None) => error_response(
            StatusCode::NOT_FOUND,
            format!("attestation not found: {id}"),
        ),
        Err(e) => storage_failure(e),
    }
}

/// `POST /admin/mint`: credential in the `x-admin-key` header.
///
/// 201 with the outcome on a successful mint, 422 with the outcome when
/// the mint itself failed (already processed, capability error, timeout).
async fn admin_mint_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<AdminMintRequest>, JsonRejection>,
) -> Response {
    let req = match payload {
        Ok(Json(req)) => req,
        Err(rejection) => return rejection_response(rejection.status(), rejection.body_text()),
    };
    let credential = headers
        .get(ADMIN_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    match state
        .pipeline
        .force_mint(credential, &req.recipient, &req.deposit_id)
        .await
    {
        Ok(outcome @ MintOutcome::Minted { .. }) => {
            (StatusCode::CREATED, Json(outcome)).into_response()
        }
        Ok(outcome) => (StatusCode::UNPROCESSABLE_ENTITY, Json(outcome)).into_response(),
        Err(AdminError::Unauthorized) => error_response(StatusCode::UNAUTHORIZED, "unauthorized"),
        Err(e @ AdminError::NotFound(_)) => error_response(StatusCode::NOT_FOUND, e.to_string()),
        Err(e @ AdminError::InvalidRecipient(_)) => {
            error_response(StatusCode::BAD_REQUEST, e.to_string())
        }
        Err(AdminError::Storage(e)) => storage_failure(e),
    }
}

/// `GET /ws`: upgrades to a push-only stream of pipeline events as JSON.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
}

async fn handle_ws_connection(mut socket: WebSocket, state: AppState) {
    let mut rx = state.pipeline.bus().subscribe();

    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Ok(ev) => {
                        let payload = match serde_json::to_string(&ev) {
                            Ok(s) => s,
                            Err(e) => {
                                tracing::warn!("failed to serialize ws event: {}", e);
                                continue;
                            }
                        };
                        if socket.send(Message::Text(payload)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("ws subscriber lagged by {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            msg = socket.recv() => {
                match msg {
                    // Client messages are ignored.
                    Some(Ok(_)) => {}
                    _ => break,
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
