//! Admin-token gate for operator routes (`/metrics`).

use crate::error::AppError;
use crate::state::AppState;
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;

/// `x-admin-token` wins over `Authorization: Bearer`.
fn presented_token(headers: &HeaderMap) -> Option<&str> {
    let direct = headers
        .get("x-admin-token")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty());
    direct.or_else(|| {
        headers
            .get(header::AUTHORIZATION)?
            .to_str()
            .ok()?
            .strip_prefix("Bearer ")
            .map(str::trim)
    })
}

fn tokens_match(got: &str, expected: &str) -> bool {
    got.len() == expected.len()
        && got
            .bytes()
            .zip(expected.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

pub async fn require_admin_token(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.admin_token.as_deref() else {
        return AppError::Forbidden("admin endpoints disabled".into()).into_response();
    };
    match presented_token(req.headers()) {
        Some(got) if tokens_match(got, expected) => next.run(req).await,
        _ => AppError::Forbidden("admin token required".into()).into_response(),
    }
}
