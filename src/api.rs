//! HTTP API surface.
//!
//! A thin axum router over the chain's read snapshots, transaction
//! submission and the privileged testnet mint. Every response uses the
//! `{ok, data | error, message}` envelope.

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::error;

use crate::chain::ChainError;
use crate::node::AppState;
use crate::params::BHX_SYMBOL;
use crate::queries::{self, ChainInfo};
use crate::slashing::{EventStatus, SlashingError, SlashingEvent, ViolationCondition};
use crate::token::TokenError;
use crate::transaction::{Transaction, TxError};

const RECENT_BLOCKS: usize = 10;

#[derive(Debug, Serialize)]
pub struct Envelope<T: Serialize> {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T: Serialize> Envelope<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            ok: true,
            data: Some(data),
            error: None,
            message: None,
        })
    }

    fn err(kind: &str, message: impl Into<String>) -> Json<Self> {
        Json(Self {
            ok: false,
            data: None,
            error: Some(kind.to_string()),
            message: Some(message.into()),
        })
    }
}

pub fn rest_router(state: AppState) -> Router {
    Router::new()
        .route("/blockchain/info", get(blockchain_info))
        .route("/balance/query", post(balance_query))
        .route("/admin/add-tokens", post(admin_add_tokens))
        .route("/admin/slashing/report", post(admin_slashing_report))
        .route("/admin/slashing/execute", post(admin_slashing_execute))
        .route("/tx/submit", post(submit_tx))
        .with_state(state)
}

/// Serve the API on a pre-bound listener until shutdown.
pub async fn serve(listener: TcpListener, state: AppState, mut shutdown: broadcast::Receiver<()>) {
    let app = rest_router(state);
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await;
    if let Err(e) = result {
        error!(error = %e, "API server terminated");
    }
}

async fn blockchain_info(State(state): State<AppState>) -> Json<Envelope<ChainInfo>> {
    let chain = state.chain.read().await;
    Envelope::ok(queries::chain_info(&chain, RECENT_BLOCKS))
}

#[derive(Debug, Deserialize)]
struct BalanceQuery {
    address: String,
    #[serde(default)]
    token_symbol: Option<String>,
}

#[derive(Debug, Serialize)]
struct BalanceResponse {
    address: String,
    token_symbol: String,
    balance: u64,
}

async fn balance_query(
    State(state): State<AppState>,
    Json(query): Json<BalanceQuery>,
) -> Json<Envelope<BalanceResponse>> {
    let symbol = query.token_symbol.unwrap_or_else(|| BHX_SYMBOL.to_string());
    if !state.tokens.exists(&symbol) {
        return Envelope::err("TokenNotFound", format!("token {symbol} is not registered"));
    }
    Envelope::ok(BalanceResponse {
        balance: state.tokens.balance_of(&symbol, &query.address),
        address: query.address,
        token_symbol: symbol,
    })
}

#[derive(Debug, Deserialize)]
struct AddTokensRequest {
    address: String,
    #[serde(default)]
    token_symbol: Option<String>,
    amount: u64,
}

#[derive(Debug, Serialize)]
struct AddTokensResponse {
    address: String,
    balance: u64,
}

/// Testnet faucet: mints straight into an account.
async fn admin_add_tokens(
    State(state): State<AppState>,
    Json(req): Json<AddTokensRequest>,
) -> Json<Envelope<AddTokensResponse>> {
    let symbol = req.token_symbol.unwrap_or_else(|| BHX_SYMBOL.to_string());
    let mut chain = state.chain.write().await;
    match chain.admin_mint(&symbol, &req.address, req.amount).await {
        Ok(()) => Envelope::ok(AddTokensResponse {
            balance: state.tokens.balance_of(&symbol, &req.address),
            address: req.address,
        }),
        Err(e) => Envelope::err(chain_error_kind(&e), e.to_string()),
    }
}

#[derive(Debug, Deserialize)]
struct SlashingReportRequest {
    validator: String,
    condition: ViolationCondition,
    #[serde(default)]
    evidence: String,
    block_height: u64,
}

/// Record a violation against a validator. The pending event is returned
/// so the operator can inspect severity and amount before executing.
async fn admin_slashing_report(
    State(state): State<AppState>,
    Json(req): Json<SlashingReportRequest>,
) -> Json<Envelope<SlashingEvent>> {
    let mut slashing = state.slashing.lock().await;
    let id = slashing.report_violation(
        &state.stakes,
        &req.validator,
        req.condition,
        req.evidence,
        req.block_height,
    );
    match slashing.event(&id) {
        Some(event) => Envelope::ok(event.clone()),
        None => Envelope::err("EventNotFound", format!("event {id} missing after report")),
    }
}

#[derive(Debug, Deserialize)]
struct SlashingExecuteRequest {
    event_id: String,
}

#[derive(Debug, Serialize)]
struct SlashingExecuteResponse {
    event_id: String,
    status: EventStatus,
    validator_stake: u64,
}

/// Execute a pending slashing event against the live ledgers. The safety
/// interlock surfaces as a successful response with `blocked_safety`.
async fn admin_slashing_execute(
    State(state): State<AppState>,
    Json(req): Json<SlashingExecuteRequest>,
) -> Json<Envelope<SlashingExecuteResponse>> {
    let mut slashing = state.slashing.lock().await;
    match slashing.execute_slashing(&req.event_id, &state.tokens, &state.stakes) {
        Ok(status) => {
            let validator_stake = slashing
                .event(&req.event_id)
                .map(|e| state.stakes.get(&e.validator))
                .unwrap_or(0);
            Envelope::ok(SlashingExecuteResponse {
                event_id: req.event_id,
                status,
                validator_stake,
            })
        }
        Err(e) => Envelope::err(slashing_error_kind(&e), e.to_string()),
    }
}

#[derive(Debug, Serialize)]
struct SubmitResponse {
    id: String,
}

async fn submit_tx(
    State(state): State<AppState>,
    Json(tx): Json<Transaction>,
) -> Json<Envelope<SubmitResponse>> {
    let mut chain = state.chain.write().await;
    match chain.submit_local_transaction(tx) {
        Ok(id) => Envelope::ok(SubmitResponse { id }),
        Err(e) => Envelope::err(tx_error_kind(&e), e.to_string()),
    }
}

fn tx_error_kind(e: &TxError) -> &'static str {
    match e {
        TxError::InsufficientBalance { .. } => "InsufficientBalance",
        TxError::InsufficientStake { .. } => "InsufficientStake",
        TxError::UnknownToken(_) => "TokenNotFound",
        TxError::DuplicateId(_) => "DuplicateTransaction",
        TxError::MempoolFull => "MempoolFull",
        _ => "InvalidTransaction",
    }
}

fn chain_error_kind(e: &ChainError) -> &'static str {
    match e {
        ChainError::Token(TokenError::TokenNotFound(_)) => "TokenNotFound",
        ChainError::Token(TokenError::InsufficientBalance { .. }) => "InsufficientBalance",
        ChainError::Token(_) => "InvalidTransaction",
        ChainError::Admission(tx) => tx_error_kind(tx),
        ChainError::Storage(_) => "StorageError",
        ChainError::ReorgFailed(_) => "ReorgFailed",
    }
}

fn slashing_error_kind(e: &SlashingError) -> &'static str {
    match e {
        SlashingError::UnknownEvent(_) => "EventNotFound",
        SlashingError::NotPending(_) => "EventNotPending",
        SlashingError::Custody(_) => "SlashingFailed",
    }
}
