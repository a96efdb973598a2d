//! Bounty Registry Server
//!
//! HTTP surface over [`BountyRegistry`]. The caller's principal is read from
//! the `x-principal` header.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Path, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::error::BountyError;
use crate::registry::BountyRegistry;
use crate::types::{
    Amount, Bounty, ClaimReceipt, ClaimRecord, CredentialId, Principal, WinnerRank,
};

pub const CALLER_HEADER: &str = "x-principal";

pub struct AppState {
    pub registry: Arc<BountyRegistry>,
    pub started_at: std::time::Instant,
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/bounties", get(list_bounties_handler).post(create_bounty_handler))
        .route("/bounties/:key", get(get_bounty_handler))
        .route("/bounties/:key/rewards/:index", get(reward_handler))
        .route(
            "/bounties/:key/winners",
            get(winners_handler).post(set_winners_handler),
        )
        .route("/bounties/:key/claim", post(claim_self_handler))
        .route("/bounties/:key/claim/:principal", post(claim_for_handler))
        .route("/bounties/:key/ranks/:principal", get(rank_handler))
        .route("/bounties/:key/claims/:principal", get(claimed_handler))
        .route("/credentials/:principal/count", get(credential_count_handler))
        .route("/tokens/:id", get(token_handler))
        .route("/balances/:principal", get(balance_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ============================================================================
// ERRORS AND CALLER IDENTITY
// ============================================================================

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl From<BountyError> for ApiError {
    fn from(err: BountyError) -> Self {
        let status = match &err {
            BountyError::DuplicateBountyKey(_) | BountyError::AlreadyClaimed { .. } => {
                StatusCode::CONFLICT
            }
            BountyError::UnknownBounty(_) | BountyError::RewardIndexOutOfRange { .. } => {
                StatusCode::NOT_FOUND
            }
            BountyError::Unauthorized { .. } => StatusCode::FORBIDDEN,
            BountyError::InsufficientFunds { .. } => StatusCode::PAYMENT_REQUIRED,
            BountyError::NotAWinner { .. }
            | BountyError::InvalidInput(_)
            | BountyError::InvalidWinners { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            BountyError::EscrowExhausted { .. }
            | BountyError::Ledger(_)
            | BountyError::Storage(_) => {
                error!("Registry failure: {}", err);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self {
            status,
            code: err.code(),
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({ "error": self.code, "message": self.message })),
        )
            .into_response()
    }
}

/// Principal making the request
pub struct Caller(pub Principal);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(CALLER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| Caller(Principal::from(v)))
            .ok_or_else(|| ApiError {
                status: StatusCode::UNAUTHORIZED,
                code: "missing_caller",
                message: format!("missing {} header", CALLER_HEADER),
            })
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ============================================================================
// HANDLERS
// ============================================================================

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "healthy": true,
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[derive(Debug, Deserialize)]
pub struct CreateBountyRequest {
    pub key: String,
    pub metadata_ref: String,
    pub token_limit: u32,
    #[serde(default)]
    pub reward_schedule: Vec<Amount>,
}

async fn create_bounty_handler(
    State(state): State<Arc<AppState>>,
    Caller(issuer): Caller,
    Json(request): Json<CreateBountyRequest>,
) -> ApiResult<(StatusCode, Json<Bounty>)> {
    let bounty = state.registry.create_bounty(
        &issuer,
        &request.key,
        &request.metadata_ref,
        request.token_limit,
        request.reward_schedule,
    )?;
    Ok((StatusCode::CREATED, Json(bounty)))
}

async fn list_bounties_handler(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<Bounty>>> {
    Ok(Json(state.registry.list_bounties()?))
}

async fn get_bounty_handler(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> ApiResult<Json<Bounty>> {
    state
        .registry
        .get_bounty(&key)?
        .map(Json)
        .ok_or_else(|| BountyError::UnknownBounty(key).into())
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RewardResponse {
    pub index: usize,
    pub amount: Amount,
}

async fn reward_handler(
    State(state): State<Arc<AppState>>,
    Path((key, index)): Path<(String, usize)>,
) -> ApiResult<Json<RewardResponse>> {
    let amount = state.registry.get_reward_at(&key, index)?;
    Ok(Json(RewardResponse { index, amount }))
}

#[derive(Debug, Deserialize)]
pub struct SetWinnersRequest {
    pub winners: Vec<Principal>,
}

async fn set_winners_handler(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    Path(key): Path<String>,
    Json(request): Json<SetWinnersRequest>,
) -> ApiResult<Json<Vec<WinnerRank>>> {
    state
        .registry
        .set_winners(&caller, &key, &request.winners)?;
    Ok(Json(state.registry.winners_of(&key)?))
}

async fn winners_handler(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> ApiResult<Json<Vec<WinnerRank>>> {
    Ok(Json(state.registry.winners_of(&key)?))
}

async fn claim_self_handler(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    Path(key): Path<String>,
) -> ApiResult<Json<ClaimReceipt>> {
    Ok(Json(state.registry.claim_self(&caller, &key)?))
}

async fn claim_for_handler(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    Path((key, principal)): Path<(String, String)>,
) -> ApiResult<Json<ClaimReceipt>> {
    let principal = Principal::from(principal);
    Ok(Json(state.registry.claim_for(&caller, &key, &principal)?))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RankResponse {
    pub principal: Principal,
    pub rank: Option<u32>,
}

async fn rank_handler(
    State(state): State<Arc<AppState>>,
    Path((key, principal)): Path<(String, String)>,
) -> ApiResult<Json<RankResponse>> {
    let principal = Principal::from(principal);
    let rank = state.registry.get_rank(&principal, &key)?;
    Ok(Json(RankResponse { principal, rank }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClaimStatusResponse {
    pub principal: Principal,
    pub claimed: bool,
    pub claim: Option<ClaimRecord>,
}

async fn claimed_handler(
    State(state): State<Arc<AppState>>,
    Path((key, principal)): Path<(String, String)>,
) -> ApiResult<Json<ClaimStatusResponse>> {
    let principal = Principal::from(principal);
    let claim = state.registry.get_claimed(&principal, &key)?;
    Ok(Json(ClaimStatusResponse {
        principal,
        claimed: claim.is_some(),
        claim,
    }))
}

async fn credential_count_handler(
    State(state): State<Arc<AppState>>,
    Path(principal): Path<String>,
) -> Json<serde_json::Value> {
    let principal = Principal::from(principal);
    let count = state.registry.credential_owner_balance(&principal);
    Json(json!({ "principal": principal, "count": count }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub id: u64,
    pub owner: Principal,
    pub metadata_ref: Option<String>,
}

async fn token_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> ApiResult<Json<TokenResponse>> {
    let credential = CredentialId(id);
    let owner = state
        .registry
        .credential_owner(credential)
        .ok_or_else(|| ApiError {
            status: StatusCode::NOT_FOUND,
            code: "unknown_credential",
            message: format!("credential {} does not exist", credential),
        })?;
    Ok(Json(TokenResponse {
        id,
        owner,
        metadata_ref: state.registry.credential_metadata(credential),
    }))
}

async fn balance_handler(
    State(state): State<Arc<AppState>>,
    Path(principal): Path<String>,
) -> Json<serde_json::Value> {
    let principal = Principal::from(principal);
    let balance = state.registry.balance_of(&principal);
    Json(json!({ "principal": principal, "balance": balance }))
}

/// Run the server
pub async fn run_server(host: &str, port: u16, registry: Arc<BountyRegistry>) -> anyhow::Result<()> {
    let state = Arc::new(AppState {
        registry,
        started_at: std::time::Instant::now(),
    });

    let app = create_router(state);
    let addr = format!("{}:{}", host, port);

    info!("Starting Bounty Registry server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
