//! Admin HTTP surface (§6.4): an `axum` router over shared state, with an
//! `Error` type implementing `IntoResponse`.

mod error;

pub use error::AdminError;

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::dispatcher::{Action, Dispatcher};
use crate::domain::{ActionKind, ChainId, TransactionInvariant, TransactionVariant};

pub struct AdminState {
    pub config: Config,
    pub dispatcher: Arc<Dispatcher>,
}

#[derive(Debug, Deserialize)]
pub struct LiquidityRequest {
    pub chain_id: ChainId,
    pub tix: TransactionInvariant,
    pub variant: TransactionVariant,
}

#[derive(Debug, Serialize)]
pub struct LiquidityResponse {
    pub transaction_hash: ethers::types::H256,
}

/// Builds the admin router bound to `state`.
#[must_use]
pub fn router(state: Arc<AdminState>) -> Router {
    Router::new()
        .route("/ping", get(ping))
        .route("/config", get(get_config))
        .route("/metrics", get(get_metrics))
        .route("/remove-liquidity", post(remove_liquidity))
        .route("/add-liquidity-for", post(add_liquidity_for))
        .with_state(state)
}

async fn ping() -> &'static str {
    "pong"
}

async fn get_config(State(state): State<Arc<AdminState>>) -> Json<Config> {
    Json(state.config.clone())
}

async fn get_metrics() -> Result<String, AdminError> {
    crate::metrics::encode().map_err(AdminError::Metrics)
}

async fn remove_liquidity(
    State(state): State<Arc<AdminState>>,
    Json(request): Json<LiquidityRequest>,
) -> Result<Json<LiquidityResponse>, AdminError> {
    dispatch_liquidity_action(&state, request, ActionKind::Cancel).await
}

async fn add_liquidity_for(
    State(state): State<Arc<AdminState>>,
    Json(request): Json<LiquidityRequest>,
) -> Result<Json<LiquidityResponse>, AdminError> {
    dispatch_liquidity_action(&state, request, ActionKind::Prepare).await
}

async fn dispatch_liquidity_action(
    state: &AdminState,
    request: LiquidityRequest,
    kind: ActionKind,
) -> Result<Json<LiquidityResponse>, AdminError> {
    let action = Action {
        chain_id: request.chain_id,
        kind,
        tix: request.tix,
        variant: request.variant,
        relayer_signature: None,
    };
    let receipt = state
        .dispatcher
        .dispatch(action)
        .await
        .map_err(AdminError::Dispatch)?;
    Ok(Json(LiquidityResponse {
        transaction_hash: receipt.transaction_hash,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ping_returns_pong() {
        assert_eq!(ping().await, "pong");
    }
}
