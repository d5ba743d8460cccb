use crate::constants::DEFAULT_UTXO_RANGE_SPAN;
use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::types::{ExistsResponse, IndicesRequest, IndicesResponse, RangeQuery, RangeResponse};
use crate::validation::{ensure_hex, normalize_output_key};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::Json as AxumJson;
use std::sync::Arc;
use tracing::debug;

fn parse_bound(v: Option<&str>) -> Option<u64> {
    v.and_then(|s| s.trim().parse::<u64>().ok())
}

/// `[start, end)` over leaf indices. `total` is the chain's `nextIndex` when readable.
pub async fn range(
    State(state): State<Arc<AppState>>,
    Query(q): Query<RangeQuery>,
) -> AxumJson<RangeResponse> {
    let start = parse_bound(q.start.as_deref()).unwrap_or(0);
    let end = parse_bound(q.end.as_deref())
        .filter(|&e| e > 0)
        .unwrap_or_else(|| start.saturating_add(DEFAULT_UTXO_RANGE_SPAN));

    let total = match state.state_cache.get().await {
        Ok(s) => s.next_index,
        Err(e) => {
            debug!(error = %e, "tree state unavailable; using local length");
            state.indexer.dense_len().await
        }
    };

    AxumJson(RangeResponse {
        encrypted_outputs: state.indexer.outputs_in_range(start, end).await,
        has_more: end < total,
        total,
    })
}

pub async fn indices(
    State(state): State<Arc<AppState>>,
    body: Result<AxumJson<IndicesRequest>, JsonRejection>,
) -> AppResult<AxumJson<IndicesResponse>> {
    let AxumJson(req) = body.map_err(|e| {
        debug!(error = %e.body_text(), "indices body rejected");
        AppError::BadRequest("Missing encrypted_outputs array".into())
    })?;
    let outputs: Vec<String> = req
        .outputs()?
        .iter()
        .map(String::as_str)
        .map(normalize_output_key)
        .collect();
    Ok(AxumJson(IndicesResponse {
        indices: state.indexer.indices_for(&outputs).await,
    }))
}

/// Rescans a bounded number of times before answering `false`; freshly confirmed
/// transactions can lag behind `getSignaturesForAddress`.
pub async fn check(
    State(state): State<Arc<AppState>>,
    Path(encrypted_output): Path<String>,
) -> AxumJson<ExistsResponse> {
    let key = normalize_output_key(&encrypted_output);
    if ensure_hex("encryptedOutput", &key).is_err() {
        return AxumJson(ExistsResponse { exists: false });
    }
    let exists = state
        .indexer
        .wait_for_output(&key, state.utxo_check_retries, state.utxo_check_retry_delay)
        .await;
    AxumJson(ExistsResponse { exists })
}
