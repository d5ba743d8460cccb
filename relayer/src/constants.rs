// Centralized constants (kept out of `main.rs`).

// ---------------------------------------------------------------------
// Program / PDA
// ---------------------------------------------------------------------
pub(crate) const DEFAULT_PROGRAM_ID: &str = "ATZj4jZ4FFzkvAcvk27DW9GRkgSbFnHo49fKKPQXU7VS";
pub(crate) const DEFAULT_RPC_URL: &str = "https://api.devnet.solana.com";
pub(crate) const DEFAULT_BIND: &str = "0.0.0.0:4000";
pub(crate) const TREE_ACCOUNT_SEED: &[u8] = b"merkle_tree";

/// Event emitted once per appended leaf.
pub(crate) const COMMITMENT_EVENT_NAME: &str = "CommitmentInserted";
pub(crate) const PROGRAM_DATA_PREFIX: &str = "Program data: ";

// ---------------------------------------------------------------------
// Tree geometry (must match the deployed program)
// ---------------------------------------------------------------------
pub(crate) const DEFAULT_MERKLE_TREE_HEIGHT: usize = 26;
pub(crate) const DEFAULT_ROOT_HISTORY_SIZE: usize = 100;

// ---------------------------------------------------------------------
// Indexing
// ---------------------------------------------------------------------
pub(crate) const DEFAULT_EVENT_MAX_ENCRYPTED_LEN: u32 = 10_000;
pub(crate) const SIGNATURE_PAGE_LIMIT: usize = 1_000;
pub(crate) const DEFAULT_SCAN_MAX_SIGNATURES: usize = 1_000;
pub(crate) const DEFAULT_REINDEX_INTERVAL_SECS: u64 = 60;
pub(crate) const DEFAULT_STATE_CACHE_TTL_MS: u64 = 30_000;
pub(crate) const DEFAULT_RPC_TIMEOUT_SECS: u64 = 30;
pub(crate) const DEFAULT_UTXO_CHECK_RETRIES: u32 = 3;
pub(crate) const DEFAULT_UTXO_CHECK_RETRY_DELAY_MS: u64 = 2_000;
/// `/utxos/range` page size when `end` is omitted.
pub(crate) const DEFAULT_UTXO_RANGE_SPAN: u64 = 20_000;

// ---------------------------------------------------------------------
// Submission
// ---------------------------------------------------------------------
pub(crate) const DEFAULT_CONFIRM_MAX_ATTEMPTS: u32 = 30;
pub(crate) const DEFAULT_CONFIRM_POLL_MS: u64 = 2_000;
pub(crate) const DEFAULT_POST_SUBMIT_INDEX_DELAY_MS: u64 = 2_000;
pub(crate) const DEFAULT_WITHDRAW_COMPUTE_UNIT_LIMIT: u32 = 1_000_000;
pub(crate) const SEND_MAX_RETRIES: usize = 5;

// ---------------------------------------------------------------------
// `/config` defaults
// ---------------------------------------------------------------------
pub(crate) const DEFAULT_WITHDRAW_FEE_RATE: f64 = 0.0025;
pub(crate) const DEFAULT_WITHDRAW_RENT_FEE: f64 = 0.002_039_28;
pub(crate) const DEFAULT_DEPOSIT_FEE_RATE: f64 = 0.0;
pub(crate) const DEFAULT_MAX_DEPOSIT_AMOUNT: u64 = 1_000_000_000_000;

// ---------------------------------------------------------------------
// Input validation limits
// ---------------------------------------------------------------------
pub(crate) const MAX_PUBKEY_B58_LEN: usize = 64;
pub(crate) const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;
pub(crate) const MAX_INDICES_BATCH: usize = 50_000;
