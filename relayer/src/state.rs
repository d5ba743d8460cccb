use crate::config::{Config, FeeConfig};
use crate::indexer::Indexer;
use crate::relay::Relay;
use crate::state_cache::StateCache;
use solana_sdk::signature::Keypair;
use std::sync::Arc;
use std::time::Duration;

pub struct AppState {
    pub indexer: Arc<Indexer>,
    pub state_cache: StateCache,
    pub relay: Relay,
    pub executor: Option<Arc<Keypair>>,
    pub admin_token: Option<String>,
    pub fees: FeeConfig,
    pub post_submit_index_delay: Duration,
    pub utxo_check_retries: u32,
    pub utxo_check_retry_delay: Duration,
}

impl AppState {
    pub fn new(
        cfg: &Config,
        indexer: Arc<Indexer>,
        state_cache: StateCache,
        relay: Relay,
    ) -> Self {
        Self {
            indexer,
            state_cache,
            relay,
            executor: cfg.executor.clone(),
            admin_token: cfg.admin_token.clone(),
            fees: cfg.fees,
            post_submit_index_delay: cfg.post_submit_index_delay,
            utxo_check_retries: cfg.utxo_check_retries,
            utxo_check_retry_delay: cfg.utxo_check_retry_delay,
        }
    }

    pub fn has_executor(&self) -> bool {
        self.executor.is_some()
    }
}
