use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::types::{DepositRequest, SubmitResponse, WithdrawRequest};
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json as AxumJson;
use std::sync::Arc;
use tracing::{info, warn};

/// Give the new leaves a moment to show up in signature history, then index them.
/// Failure here does not undo a confirmed submission.
async fn index_after_submit(state: &AppState) {
    state.state_cache.invalidate();
    tokio::time::sleep(state.post_submit_index_delay).await;
    match state.indexer.scan().await {
        Ok(r) => info!(new_entries = r.new_entries, "post-submit scan complete"),
        Err(e) => warn!(error = %e, "post-submit scan failed"),
    }
}

pub async fn deposit(
    State(state): State<Arc<AppState>>,
    body: Result<AxumJson<DepositRequest>, JsonRejection>,
) -> AppResult<AxumJson<SubmitResponse>> {
    let AxumJson(req) = body?;
    let signed = req.signed_transaction()?;
    info!(sender = req.sender_address.as_deref().unwrap_or("-"), "deposit received");
    let signature = state.relay.submit_deposit(signed).await?;
    index_after_submit(&state).await;
    Ok(AxumJson(SubmitResponse {
        success: true,
        signature: signature.to_string(),
    }))
}

pub async fn withdraw(
    State(state): State<Arc<AppState>>,
    body: Result<AxumJson<WithdrawRequest>, JsonRejection>,
) -> AppResult<AxumJson<SubmitResponse>> {
    if !state.has_executor() {
        return Err(AppError::ExecutorNotConfigured);
    }
    let AxumJson(req) = body?;
    let bundle = req.into_bundle()?;
    info!(recipient = %bundle.accounts.recipient, "withdraw received");
    let signature = state.relay.submit_withdraw(bundle).await?;
    index_after_submit(&state).await;
    Ok(AxumJson(SubmitResponse {
        success: true,
        signature: signature.to_string(),
    }))
}
