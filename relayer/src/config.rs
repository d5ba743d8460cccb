//! Environment-driven configuration.
//!
//! Everything has a default except the executor key; without it withdrawals answer
//! `ExecutorNotConfigured` and everything else keeps working.

use crate::constants::*;
use anyhow::Context;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Keypair;
use std::env;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct Config {
    pub rpc_url: String,
    pub rpc_timeout: Duration,
    pub program_id: Pubkey,
    /// Tree account PDA (`["merkle_tree"]` under the program) unless overridden.
    pub tree_account: Pubkey,
    pub bind: String,
    pub executor: Option<Arc<Keypair>>,
    /// Gates `/metrics`. Unset = route not mounted.
    pub admin_token: Option<String>,

    pub levels: usize,
    pub root_history_size: usize,

    pub state_cache_ttl: Duration,
    pub reindex_interval: Duration,
    pub scan_max_signatures: usize,
    pub event_max_encrypted_len: u32,
    pub event_require_discriminator: bool,

    pub confirm_max_attempts: u32,
    pub confirm_poll: Duration,
    pub post_submit_index_delay: Duration,
    pub utxo_check_retries: u32,
    pub utxo_check_retry_delay: Duration,
    pub withdraw_compute_unit_limit: u32,

    pub fees: FeeConfig,
}

/// Static values served by `/config`.
#[derive(Debug, Clone, Copy)]
pub struct FeeConfig {
    pub withdraw_fee_rate: f64,
    pub withdraw_rent_fee: f64,
    pub deposit_fee_rate: f64,
    /// Fallback when the tree account cannot be read.
    pub default_max_deposit_amount: u64,
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            withdraw_fee_rate: DEFAULT_WITHDRAW_FEE_RATE,
            withdraw_rent_fee: DEFAULT_WITHDRAW_RENT_FEE,
            deposit_fee_rate: DEFAULT_DEPOSIT_FEE_RATE,
            default_max_deposit_amount: DEFAULT_MAX_DEPOSIT_AMOUNT,
        }
    }
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .map(|v| {
            let s = v.trim().to_lowercase();
            matches!(s.as_str(), "1" | "true" | "yes" | "y" | "on")
        })
        .unwrap_or(default)
}

pub fn tree_account_pda(program_id: &Pubkey) -> Pubkey {
    Pubkey::find_program_address(&[TREE_ACCOUNT_SEED], program_id).0
}

/// Base58-encoded 64-byte secret key (Phantom / `solana-keygen` export format).
pub fn parse_executor_key(b58: &str) -> anyhow::Result<Keypair> {
    let bytes = bs58::decode(b58.trim())
        .into_vec()
        .context("EXECUTOR_PRIVATE_KEY is not base58")?;
    if bytes.len() != 64 {
        anyhow::bail!(
            "EXECUTOR_PRIVATE_KEY must decode to 64 bytes, got {}",
            bytes.len()
        );
    }
    #[allow(deprecated)]
    let kp = Keypair::from_bytes(&bytes)
        .map_err(|e| anyhow::anyhow!("EXECUTOR_PRIVATE_KEY is not a valid keypair: {e}"))?;
    Ok(kp)
}

fn bind_addr() -> String {
    if let Some(b) = env_opt("RELAYER_BIND") {
        return b;
    }
    match env_opt("RELAYER_PORT") {
        Some(port) => format!("0.0.0.0:{port}"),
        None => DEFAULT_BIND.to_string(),
    }
}

pub fn load_config() -> anyhow::Result<Config> {
    let rpc_url = env_opt("RPC_URL").unwrap_or_else(|| DEFAULT_RPC_URL.to_string());
    let program_id_raw = env_opt("PROGRAM_ID").unwrap_or_else(|| DEFAULT_PROGRAM_ID.to_string());
    let program_id = Pubkey::from_str(&program_id_raw).context("Invalid PROGRAM_ID")?;
    let tree_account = match env_opt("TREE_ACCOUNT") {
        Some(s) => Pubkey::from_str(&s).context("Invalid TREE_ACCOUNT")?,
        None => tree_account_pda(&program_id),
    };

    let executor = env_opt("EXECUTOR_PRIVATE_KEY")
        .map(|s| parse_executor_key(&s))
        .transpose()?
        .map(Arc::new);

    let levels = env_u64("MERKLE_TREE_HEIGHT", DEFAULT_MERKLE_TREE_HEIGHT as u64) as usize;
    if levels == 0 || levels > 32 {
        anyhow::bail!("MERKLE_TREE_HEIGHT must be in 1..=32, got {levels}");
    }
    let root_history_size =
        env_u64("ROOT_HISTORY_SIZE", DEFAULT_ROOT_HISTORY_SIZE as u64) as usize;

    let event_max_encrypted_len =
        u32::try_from(env_u64("EVENT_MAX_ENCRYPTED_LEN", DEFAULT_EVENT_MAX_ENCRYPTED_LEN as u64))
            .context("EVENT_MAX_ENCRYPTED_LEN out of range")?;
    let withdraw_compute_unit_limit = u32::try_from(env_u64(
        "WITHDRAW_COMPUTE_UNIT_LIMIT",
        DEFAULT_WITHDRAW_COMPUTE_UNIT_LIMIT as u64,
    ))
    .context("WITHDRAW_COMPUTE_UNIT_LIMIT out of range")?;

    Ok(Config {
        rpc_url,
        rpc_timeout: Duration::from_secs(env_u64("RPC_TIMEOUT_SECS", DEFAULT_RPC_TIMEOUT_SECS)),
        program_id,
        tree_account,
        bind: bind_addr(),
        executor,
        admin_token: env_opt("ADMIN_TOKEN"),
        levels,
        root_history_size,
        state_cache_ttl: Duration::from_millis(env_u64(
            "STATE_CACHE_TTL_MS",
            DEFAULT_STATE_CACHE_TTL_MS,
        )),
        reindex_interval: Duration::from_secs(env_u64(
            "REINDEX_INTERVAL_SECS",
            DEFAULT_REINDEX_INTERVAL_SECS,
        )),
        scan_max_signatures: env_u64("SCAN_MAX_SIGNATURES", DEFAULT_SCAN_MAX_SIGNATURES as u64)
            .max(1) as usize,
        event_max_encrypted_len,
        event_require_discriminator: env_bool("EVENT_REQUIRE_DISCRIMINATOR", false),
        confirm_max_attempts: env_u64("CONFIRM_MAX_ATTEMPTS", DEFAULT_CONFIRM_MAX_ATTEMPTS as u64)
            as u32,
        confirm_poll: Duration::from_millis(env_u64("CONFIRM_POLL_MS", DEFAULT_CONFIRM_POLL_MS)),
        post_submit_index_delay: Duration::from_millis(env_u64(
            "POST_SUBMIT_INDEX_DELAY_MS",
            DEFAULT_POST_SUBMIT_INDEX_DELAY_MS,
        )),
        utxo_check_retries: env_u64("UTXO_CHECK_RETRIES", DEFAULT_UTXO_CHECK_RETRIES as u64)
            as u32,
        utxo_check_retry_delay: Duration::from_millis(env_u64(
            "UTXO_CHECK_RETRY_DELAY_MS",
            DEFAULT_UTXO_CHECK_RETRY_DELAY_MS,
        )),
        withdraw_compute_unit_limit,
        fees: FeeConfig {
            withdraw_fee_rate: env_f64("WITHDRAW_FEE_RATE", DEFAULT_WITHDRAW_FEE_RATE),
            withdraw_rent_fee: env_f64("WITHDRAW_RENT_FEE", DEFAULT_WITHDRAW_RENT_FEE),
            deposit_fee_rate: env_f64("DEPOSIT_FEE_RATE", DEFAULT_DEPOSIT_FEE_RATE),
            default_max_deposit_amount: env_u64(
                "DEFAULT_MAX_DEPOSIT_AMOUNT",
                DEFAULT_MAX_DEPOSIT_AMOUNT,
            ),
        },
    })
}
