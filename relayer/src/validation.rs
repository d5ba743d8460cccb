use crate::constants::MAX_PUBKEY_B58_LEN;
use crate::error::AppError;
use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;

pub fn ensure_len_le(field: &str, s: &str, max: usize) -> Result<(), AppError> {
    if s.len() > max {
        return Err(AppError::BadRequest(format!(
            "{field} too long: {} chars (max {max})",
            s.len()
        )));
    }
    Ok(())
}

pub fn ensure_pubkey_len(field: &str, s: &str) -> Result<(), AppError> {
    let t = s.trim();
    if t.is_empty() {
        return Err(AppError::BadRequest(format!("{field} is required")));
    }
    ensure_len_le(field, t, MAX_PUBKEY_B58_LEN)
}

pub fn parse_pubkey(field: &str, s: &str) -> Result<Pubkey, AppError> {
    ensure_pubkey_len(field, s)?;
    Pubkey::from_str(s.trim()).map_err(|_| AppError::BadRequest(format!("Invalid {field} pubkey")))
}

/// Absent or blank means "not provided".
pub fn parse_optional_pubkey(field: &str, s: Option<&str>) -> Result<Option<Pubkey>, AppError> {
    match s.map(str::trim).filter(|t| !t.is_empty()) {
        Some(t) => parse_pubkey(field, t).map(Some),
        None => Ok(None),
    }
}

/// Lowercase hex of any length (ciphertexts are opaque).
pub fn ensure_hex(field: &str, s: &str) -> Result<(), AppError> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(AppError::BadRequest(format!("{field} must be hex")));
    }
    Ok(())
}

/// Ciphertext keys are stored as lowercase hex.
pub fn normalize_output_key(s: &str) -> String {
    s.trim().to_ascii_lowercase()
}
