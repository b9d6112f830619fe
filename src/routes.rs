// ============================================================================
// ROUTES - HTTP facade over the BMT contract
// ============================================================================
//
//   GET  /tezos/test           ledger connection summary
//   GET  /tezos/tokenSupply    total supply
//   GET  /tezos/balance        ?walletAddress=tz1...
//   POST /tezos/performReward  credit the reward amount
//   POST /tezos/creditAmount   credit an explicit amount
//   POST /tezos/spendTokens    debit the spend amount
//   POST /tezos/debitAmount    debit an explicit amount
//
// Everything else falls through to the static asset directory, then to a
// JSON 404 in the same envelope as every other error.

use std::path::Path;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    handler::HandlerWithoutStateExt,
    http::Uri,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::debug;

use crate::coordinator::WalletMutationCoordinator;
use crate::error::ApiError;
use crate::types::{Amount, MutationKind, MutationRequest, WalletAddress};

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<WalletMutationCoordinator>,
}

type ApiResult = Result<Json<Value>, ApiError>;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceQuery {
    pub wallet_address: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationBody {
    pub wallet_address: Option<String>,
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

fn require_wallet(raw: Option<&str>) -> Result<WalletAddress, ApiError> {
    let raw = raw.ok_or_else(|| ApiError::validation("walletAddress is required"))?;
    Ok(WalletAddress::parse(raw)?)
}

fn require_body(body: Result<Json<MutationBody>, JsonRejection>) -> Result<MutationBody, ApiError> {
    body.map(|Json(body)| body)
        .map_err(|rejection| ApiError::validation(rejection.body_text()))
}

// ============================================================================
// READS
// ============================================================================

/// GET /tezos/test
pub async fn test_handler(State(state): State<AppState>) -> ApiResult {
    let info = state.coordinator.ledger_info().await?;
    Ok(Json(json!({ "success": true, "res": info })))
}

/// GET /tezos/tokenSupply
pub async fn token_supply_handler(State(state): State<AppState>) -> ApiResult {
    let supply = state.coordinator.token_supply().await?;
    Ok(Json(json!({ "success": true, "supply": supply })))
}

/// GET /tezos/balance?walletAddress=
pub async fn balance_handler(State(state): State<AppState>, Query(query): Query<BalanceQuery>) -> ApiResult {
    let wallet = require_wallet(query.wallet_address.as_deref())?;
    let snapshot = state.coordinator.balance(&wallet).await?;
    Ok(Json(json!({ "success": true, "balance": snapshot.amount })))
}

// ============================================================================
// MUTATIONS
// ============================================================================

async fn run_mutation(state: &AppState, request: MutationRequest) -> ApiResult {
    debug!("{} {} requested for {}", request.kind.as_str(), request.amount, request.wallet);
    let snapshot = state.coordinator.execute(request).await?;
    Ok(Json(json!({ "success": true, "newBalance": snapshot.amount })))
}

/// POST /tezos/performReward
pub async fn perform_reward_handler(
    State(state): State<AppState>,
    body: Result<Json<MutationBody>, JsonRejection>,
) -> ApiResult {
    let body = require_body(body)?;
    let wallet = require_wallet(body.wallet_address.as_deref())?;
    let request = state.coordinator.reward_request(&wallet).with_idempotency_key(body.idempotency_key);
    run_mutation(&state, request).await
}

/// POST /tezos/spendTokens
pub async fn spend_tokens_handler(
    State(state): State<AppState>,
    body: Result<Json<MutationBody>, JsonRejection>,
) -> ApiResult {
    let body = require_body(body)?;
    let wallet = require_wallet(body.wallet_address.as_deref())?;
    let request = state.coordinator.spend_request(&wallet).with_idempotency_key(body.idempotency_key);
    run_mutation(&state, request).await
}

/// POST /tezos/creditAmount
pub async fn credit_amount_handler(
    State(state): State<AppState>,
    body: Result<Json<MutationBody>, JsonRejection>,
) -> ApiResult {
    explicit_mutation(&state, body, MutationKind::Credit).await
}

/// POST /tezos/debitAmount
pub async fn debit_amount_handler(
    State(state): State<AppState>,
    body: Result<Json<MutationBody>, JsonRejection>,
) -> ApiResult {
    explicit_mutation(&state, body, MutationKind::Debit).await
}

async fn explicit_mutation(
    state: &AppState,
    body: Result<Json<MutationBody>, JsonRejection>,
    kind: MutationKind,
) -> ApiResult {
    let body = require_body(body)?;
    let wallet = require_wallet(body.wallet_address.as_deref())?;
    let amount = body.amount.ok_or_else(|| ApiError::validation("amount is required"))?;
    let request = MutationRequest::new(wallet, Amount::new(amount)?, kind)
        .with_idempotency_key(body.idempotency_key);
    run_mutation(state, request).await
}

// ============================================================================
// FALLBACK
// ============================================================================

pub async fn not_found_handler(uri: Uri) -> ApiError {
    ApiError::not_found(uri.path())
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn tezos_routes() -> Router<AppState> {
    Router::new()
        .route("/test", get(test_handler))
        .route("/tokenSupply", get(token_supply_handler))
        .route("/balance", get(balance_handler))
        .route("/performReward", post(perform_reward_handler))
        .route("/creditAmount", post(credit_amount_handler))
        .route("/spendTokens", post(spend_tokens_handler))
        .route("/debitAmount", post(debit_amount_handler))
}

pub fn build_router(state: AppState, static_dir: &Path) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let assets = ServeDir::new(static_dir)
        .call_fallback_on_method_not_allowed(true)
        .not_found_service(not_found_handler.into_service());

    Router::new()
        .nest("/tezos", tezos_routes())
        .fallback_service(assets)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
