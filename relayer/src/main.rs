// ─────────────────────────────────────────────────────────────────────────────
//  Commitment relayer: indexes pool commitments, serves Merkle proofs and
//  relays deposit/withdraw transactions.
// ─────────────────────────────────────────────────────────────────────────────
use std::sync::Arc;

use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

mod auth;
mod chain;
mod commitments;
mod config;
mod constants;
mod error;
mod event;
mod field;
mod handlers;
mod indexer;
mod merkle;
mod metrics;
mod relay;
mod router;
mod state;
mod state_cache;
mod tree_account;
mod types;
mod validation;

use crate::chain::{ChainClient, RpcChain};
use crate::constants::COMMITMENT_EVENT_NAME;
use crate::error::AppError;
use crate::event::{anchor_event_discriminator, EventFilter};
use crate::field::PoseidonHasher;
use crate::indexer::{Indexer, IndexerConfig};
use crate::relay::{ConfirmPolicy, Relay};
use crate::state::AppState;
use crate::state_cache::StateCache;
use crate::tree_account::TreeAccountLayout;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,commitment_relayer=debug".into()),
        )
        .init();

    let cfg = config::load_config()?;
    info!(
        rpc = %cfg.rpc_url,
        program = %cfg.program_id,
        tree = %cfg.tree_account,
        levels = cfg.levels,
        "starting commitment relayer"
    );
    match cfg.executor.as_ref() {
        Some(_) => info!("executor keypair loaded; withdrawals enabled"),
        None => warn!("EXECUTOR_PRIVATE_KEY not set; /withdraw will answer 503"),
    }
    if cfg.admin_token.is_none() {
        info!("ADMIN_TOKEN not set; /metrics not mounted");
    }

    // ── Chain + hashing
    let chain: Arc<dyn ChainClient> =
        Arc::new(RpcChain::new(cfg.rpc_url.clone(), cfg.rpc_timeout));
    let hasher = Arc::new(PoseidonHasher::new()?);
    let filter = EventFilter {
        max_encrypted_len: cfg.event_max_encrypted_len,
        discriminator: cfg
            .event_require_discriminator
            .then(|| anchor_event_discriminator(COMMITMENT_EVENT_NAME)),
    };

    // ── Shared state
    let indexer = Arc::new(Indexer::new(
        chain.clone(),
        hasher,
        IndexerConfig {
            tree_account: cfg.tree_account,
            levels: cfg.levels,
            max_signatures: cfg.scan_max_signatures,
            filter,
        },
    )?);
    let state_cache = StateCache::new(
        chain.clone(),
        cfg.tree_account,
        TreeAccountLayout::new(cfg.levels, cfg.root_history_size),
        cfg.state_cache_ttl,
    );
    let relay = Relay::new(
        chain,
        cfg.program_id,
        cfg.executor.clone(),
        ConfirmPolicy {
            max_attempts: cfg.confirm_max_attempts,
            poll: cfg.confirm_poll,
        },
        cfg.withdraw_compute_unit_limit,
    );
    let state = Arc::new(AppState::new(&cfg, indexer.clone(), state_cache, relay));

    // ── Startup probe + initial index
    match state.state_cache.refresh().await {
        Ok(s) => info!(next_index = s.next_index, root = %s.root, "tree account readable"),
        Err(AppError::AccountMissing) => {
            warn!("tree account not found; program may not be initialized yet")
        }
        Err(e) => warn!(error = %e, "tree account probe failed"),
    }
    match indexer.scan().await {
        Ok(r) => info!(
            new_entries = r.new_entries,
            transactions = r.transactions,
            skipped = r.skipped,
            "initial index complete"
        ),
        Err(e) => warn!(error = %e, "initial index failed; will retry on demand"),
    }

    // ── Periodic reindex
    if !cfg.reindex_interval.is_zero() {
        let indexer = indexer.clone();
        let period = cfg.reindex_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = indexer.scan().await {
                    warn!(error = %e, "periodic reindex failed");
                }
            }
        });
    }

    // ── Serve
    let app = router::build(state);
    info!("listening on {}", cfg.bind);
    let listener = tokio::net::TcpListener::bind(&cfg.bind).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}
