use crate::error::AppResult;
use crate::merkle::MerklePath;
use crate::state::AppState;
use crate::types::{ConfigResponse, ReadyResponse, RootResponse};
use crate::validation::ensure_len_le;
use axum::extract::{Path, State};
use axum::Json as AxumJson;
use std::sync::Arc;
use tracing::{debug, warn};

/// Decimal field elements are at most 78 digits; `0x` + 64 hex is 66.
const MAX_COMMITMENT_REF_LEN: usize = 80;

pub async fn get_config(State(state): State<Arc<AppState>>) -> AxumJson<ConfigResponse> {
    let max_deposit_amount = match state.state_cache.get().await {
        Ok(s) => s.max_deposit_amount,
        Err(e) => {
            warn!(error = %e, "tree state unavailable; serving default max deposit");
            state.fees.default_max_deposit_amount
        }
    };
    AxumJson(ConfigResponse {
        withdraw_fee_rate: state.fees.withdraw_fee_rate,
        withdraw_rent_fee: state.fees.withdraw_rent_fee,
        deposit_fee_rate: state.fees.deposit_fee_rate,
        max_deposit_amount,
    })
}

/// Local root when the local tree has leaves (proofs are derived from it), else the chain's.
pub async fn merkle_root(State(state): State<Arc<AppState>>) -> AppResult<AxumJson<RootResponse>> {
    let onchain = state.state_cache.get().await?;
    let root = match state.indexer.local_root().await {
        Some(r) => r,
        None => {
            debug!("local tree empty; serving on-chain root");
            onchain.root
        }
    };
    Ok(AxumJson(RootResponse {
        root,
        next_index: onchain.next_index,
    }))
}

pub async fn merkle_proof(
    State(state): State<Arc<AppState>>,
    Path(commitment): Path<String>,
) -> AppResult<AxumJson<MerklePath>> {
    let c = commitment.trim();
    ensure_len_le("commitment", c, MAX_COMMITMENT_REF_LEN)?;
    Ok(AxumJson(state.indexer.prove(c).await?))
}

pub async fn readiness(State(state): State<Arc<AppState>>) -> AxumJson<ReadyResponse> {
    let local_root = state.indexer.local_root().await;
    let onchain = state.state_cache.get().await.ok();
    let local_root_known_on_chain = match (&onchain, &local_root) {
        (Some(s), Some(r)) => Some(s.is_known_root(r)),
        _ => None,
    };
    AxumJson(ReadyResponse {
        ready: onchain.is_some() && state.indexer.current_tree().await.is_some(),
        executor_pubkey: state.relay.executor_pubkey().map(|k| k.to_string()),
        indexed_leaves: state.indexer.indexed_leaves().await,
        local_root,
        onchain_root: onchain.as_ref().map(|s| s.root),
        onchain_next_index: onchain.as_ref().map(|s| s.next_index),
        local_root_known_on_chain,
    })
}
