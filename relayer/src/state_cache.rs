use crate::chain::ChainClient;
use crate::error::{AppError, AppResult};
use crate::tree_account::{OnChainTreeState, TreeAccountLayout};
use solana_sdk::pubkey::Pubkey;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

/// Short-TTL cache of the decoded tree account.
///
/// Expiry is a timestamp check; two requests racing past an expired entry both hit RPC and the
/// later write wins. The lock is only held to copy an `Arc` in or out.
pub struct StateCache {
    chain: Arc<dyn ChainClient>,
    tree_account: Pubkey,
    layout: TreeAccountLayout,
    ttl: Duration,
    slot: RwLock<Option<(Arc<OnChainTreeState>, Instant)>>,
}

impl StateCache {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        tree_account: Pubkey,
        layout: TreeAccountLayout,
        ttl: Duration,
    ) -> Self {
        Self {
            chain,
            tree_account,
            layout,
            ttl,
            slot: RwLock::new(None),
        }
    }

    pub fn tree_account(&self) -> Pubkey {
        self.tree_account
    }

    fn cached(&self) -> Option<Arc<OnChainTreeState>> {
        let g = self.slot.read().ok()?;
        let (state, at) = g.as_ref()?;
        (at.elapsed() <= self.ttl).then(|| state.clone())
    }

    /// Cached state, or a fresh read once the TTL has passed.
    pub async fn get(&self) -> AppResult<Arc<OnChainTreeState>> {
        if !self.ttl.is_zero() {
            if let Some(s) = self.cached() {
                return Ok(s);
            }
        }
        self.refresh().await
    }

    /// Always reads the account; failures leave the previous entry in place.
    pub async fn refresh(&self) -> AppResult<Arc<OnChainTreeState>> {
        let chain = self.chain.clone();
        let address = self.tree_account;
        let data = tokio::task::spawn_blocking(move || chain.account_data(&address))
            .await
            .map_err(|e| AppError::Internal(format!("join error: {e}")))??;
        let Some(data) = data else {
            return Err(AppError::AccountMissing);
        };
        let state = Arc::new(self.layout.decode(&data)?);
        if let Ok(mut g) = self.slot.write() {
            *g = Some((state.clone(), Instant::now()));
        }
        Ok(state)
    }

    pub fn invalidate(&self) {
        if let Ok(mut g) = self.slot.write() {
            *g = None;
        }
    }
}
