use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json as AxumJson;
use solana_sdk::signature::Signature;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Bad Request: {0}")]
    BadRequest(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Bad Gateway: {0}")]
    BadGateway(String),
    #[error("Internal Error: {0}")]
    Internal(String),
    /// Tree account does not exist yet (pool program not initialized).
    #[error("Tree account not found. Program may not be initialized.")]
    AccountMissing,
    #[error("Commitment not found in index: {0}")]
    CommitmentNotFound(String),
    #[error("Local Merkle tree is empty")]
    TreeEmpty,
    #[error("Transaction failed on-chain: {signature}")]
    TransactionFailed {
        signature: Signature,
        details: serde_json::Value,
    },
    /// Outcome unknown; the caller keeps the signature and polls on its own.
    #[error("Transaction not confirmed. Check signature: {signature}")]
    ConfirmationTimeout { signature: Signature },
    #[error("Executor keypair not configured")]
    ExecutorNotConfigured,
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::AccountMissing => StatusCode::SERVICE_UNAVAILABLE,
            AppError::CommitmentNotFound(_) => StatusCode::NOT_FOUND,
            AppError::TreeEmpty => StatusCode::SERVICE_UNAVAILABLE,
            AppError::TransactionFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::ConfirmationTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            AppError::ExecutorNotConfigured => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        let body = match &self {
            AppError::BadRequest(m)
            | AppError::Forbidden(m)
            | AppError::BadGateway(m)
            | AppError::Internal(m) => {
                serde_json::json!({ "error": m })
            }
            AppError::TransactionFailed { signature, details } => serde_json::json!({
                "error": "Transaction failed on-chain",
                "signature": signature.to_string(),
                "details": details,
            }),
            AppError::ConfirmationTimeout { signature } => serde_json::json!({
                "error": self.to_string(),
                "signature": signature.to_string(),
            }),
            _ => serde_json::json!({ "error": self.to_string() }),
        };
        (status, AxumJson(body)).into_response()
    }
}

impl From<JsonRejection> for AppError {
    fn from(e: JsonRejection) -> Self {
        AppError::BadRequest(e.body_text())
    }
}

impl From<crate::field::HashError> for AppError {
    fn from(e: crate::field::HashError) -> Self {
        AppError::Internal(e.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;
