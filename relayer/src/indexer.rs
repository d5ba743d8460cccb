//! Chain scanner and proof generator.
//!
//! `Indexer` owns the commitment index and the current accumulator snapshot. Only `scan` mutates
//! them, and only one scan runs at a time:
//!
//! - `completed` counts finished scans. A caller records it before queueing on `gate`.
//! - If the count moved while it waited, a scan ran in the meantime. The caller takes that
//!   scan's report and does not start another pass.
//! - Otherwise it runs a fresh pass. A caller arriving after a scan finished still gets a new
//!   pass.
//!
//! The accumulator is rebuilt off the async runtime and published by swapping an `Arc`, so
//! readers never see a half-built tree.

use crate::chain::{ChainClient, SignatureInfo};
use crate::commitments::{CommitmentIndex, RecordOutcome};
use crate::constants::SIGNATURE_PAGE_LIMIT;
use crate::error::{AppError, AppResult};
use crate::event::{extract_commitments, EventFilter};
use crate::field::{FieldElement, FieldHasher};
use crate::merkle::{Accumulator, MerklePath, ZeroValues};
use crate::metrics;
use serde::Serialize;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanReport {
    pub new_entries: u32,
    /// Transactions whose logs were read in this pass.
    pub transactions: u32,
    /// Transactions that could not be fetched; retried next pass.
    pub skipped: u32,
    pub rebuilt: bool,
}

#[derive(Debug, Clone)]
pub struct IndexerConfig {
    pub tree_account: Pubkey,
    pub levels: usize,
    pub max_signatures: usize,
    pub filter: EventFilter,
}

#[derive(Default)]
struct ScanSlot {
    last: ScanReport,
    /// Signatures whose logs were fully applied; never refetched.
    applied: HashSet<Signature>,
    /// Index changed but the last rebuild failed.
    stale_tree: bool,
}

pub struct Indexer {
    chain: Arc<dyn ChainClient>,
    hasher: Arc<dyn FieldHasher>,
    cfg: IndexerConfig,
    zeros: Arc<ZeroValues>,
    commitments: RwLock<CommitmentIndex>,
    tree: RwLock<Option<Arc<Accumulator>>>,
    gate: Mutex<ScanSlot>,
    completed: AtomicU64,
}

impl Indexer {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        hasher: Arc<dyn FieldHasher>,
        cfg: IndexerConfig,
    ) -> AppResult<Self> {
        let zeros = ZeroValues::compute(cfg.levels, hasher.as_ref())?;
        Ok(Self {
            chain,
            hasher,
            cfg,
            zeros: Arc::new(zeros),
            commitments: RwLock::new(CommitmentIndex::new()),
            tree: RwLock::new(None),
            gate: Mutex::new(ScanSlot::default()),
            completed: AtomicU64::new(0),
        })
    }

    pub fn levels(&self) -> usize {
        self.cfg.levels
    }

    pub fn zeros(&self) -> &ZeroValues {
        &self.zeros
    }

    /// Run one indexing pass, or join the pass already in flight.
    pub async fn scan(&self) -> AppResult<ScanReport> {
        let observed = self.completed.load(Ordering::Acquire);
        let mut slot = self.gate.lock().await;
        if self.completed.load(Ordering::Acquire) != observed {
            debug!("joined in-flight scan");
            return Ok(slot.last);
        }
        let report = self.run_scan(&mut slot).await?;
        slot.last = report;
        self.completed.fetch_add(1, Ordering::Release);
        Ok(report)
    }

    async fn run_scan(&self, slot: &mut ScanSlot) -> AppResult<ScanReport> {
        let t0 = Instant::now();
        let chain = self.chain.clone();
        let address = self.cfg.tree_account;
        let max = self.cfg.max_signatures;
        let history = tokio::task::spawn_blocking(move || fetch_history(chain.as_ref(), &address, max))
            .await
            .map_err(|e| AppError::Internal(format!("join error: {e}")))??;

        // Oldest first; failed transactions emitted nothing.
        let pending: Vec<Signature> = history
            .into_iter()
            .rev()
            .filter(|s| !s.failed && !slot.applied.contains(&s.signature))
            .map(|s| s.signature)
            .collect();

        let chain = self.chain.clone();
        let fetched = tokio::task::spawn_blocking(move || {
            pending
                .into_iter()
                .map(|sig| (sig, chain.transaction_logs(&sig)))
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|e| AppError::Internal(format!("join error: {e}")))?;

        let mut report = ScanReport::default();
        let capacity = capacity(self.cfg.levels);
        {
            let mut index = self.commitments.write().await;
            for (sig, logs) in fetched {
                let logs = match logs {
                    Ok(Some(l)) => l,
                    Ok(None) => {
                        debug!(signature = %sig, "transaction logs not available yet; skipping");
                        report.skipped += 1;
                        continue;
                    }
                    Err(e) => {
                        debug!(signature = %sig, error = %e, "skipping transaction");
                        metrics::inc_scan_tx_errors_total();
                        report.skipped += 1;
                        continue;
                    }
                };
                report.transactions += 1;
                for entry in extract_commitments(&logs, &self.cfg.filter) {
                    if entry.index >= capacity {
                        warn!(index = entry.index, capacity, signature = %sig, "leaf index beyond tree capacity; skipping");
                        continue;
                    }
                    if index.record(entry) == RecordOutcome::Inserted {
                        report.new_entries += 1;
                    }
                }
                slot.applied.insert(sig);
            }
        }

        metrics::inc_scans_total();
        metrics::add_commitments_indexed(report.new_entries as u64);

        let have_tree = self.tree.read().await.is_some();
        if report.new_entries > 0 || !have_tree || slot.stale_tree {
            slot.stale_tree = true;
            self.rebuild().await?;
            slot.stale_tree = false;
            report.rebuilt = true;
        }

        let total = self.commitments.read().await.len();
        metrics::metrics().indexed_leaves.set(total as i64);
        info!(
            new_entries = report.new_entries,
            transactions = report.transactions,
            skipped = report.skipped,
            total,
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "scan complete"
        );
        Ok(report)
    }

    async fn rebuild(&self) -> AppResult<()> {
        let leaves = self.commitments.read().await.leaf_sequence();
        let zeros = self.zeros.clone();
        let hasher = self.hasher.clone();
        let t0 = Instant::now();
        let acc = tokio::task::spawn_blocking(move || {
            Accumulator::rebuild(leaves, &zeros, hasher.as_ref())
        })
        .await
        .map_err(|e| AppError::Internal(format!("join error: {e}")))??;
        let ms = t0.elapsed().as_millis();
        metrics::observe_tree_rebuild_ms(ms);
        let root = acc.root();
        let n = acc.leaf_count();
        *self.tree.write().await = Some(Arc::new(acc));
        info!(leaves = n, root = %short(&root), rebuild_ms = ms as u64, "accumulator rebuilt");
        Ok(())
    }

    /// Merkle path for a commitment given as decimal or hex.
    pub async fn prove(&self, commitment_ref: &str) -> AppResult<MerklePath> {
        let entry = match self.lookup(commitment_ref).await {
            Some(e) => e,
            None => {
                debug!(commitment = %commitment_ref, "commitment not indexed; rescanning");
                if let Err(e) = self.scan().await {
                    warn!(error = %e, "rescan before proof failed");
                }
                self.lookup(commitment_ref)
                    .await
                    .ok_or_else(|| AppError::CommitmentNotFound(commitment_ref.to_string()))?
            }
        };
        let (index, leaf) = entry;

        let mut tree = self.current_tree().await.ok_or(AppError::TreeEmpty)?;
        if tree.leaf(index) != Some(leaf) {
            // Indexed but the rebuild that includes it has not been published yet.
            if let Err(e) = self.scan().await {
                warn!(index, error = %e, "rescan for unpublished leaf failed");
            }
            tree = self.current_tree().await.ok_or(AppError::TreeEmpty)?;
            if tree.leaf(index) != Some(leaf) {
                return Err(AppError::Internal(format!(
                    "accumulator does not contain leaf {index}"
                )));
            }
        }

        let path = tree.path(index)?;
        let folded = path.fold(&leaf, self.hasher.as_ref())?;
        if folded != path.root {
            metrics::inc_proof_self_check_failures_total();
            error!(
                index,
                folded = %short(&folded),
                root = %short(&path.root),
                "derived path does not fold to the accumulator root"
            );
            return Err(AppError::Internal("merkle path self-check failed".into()));
        }
        metrics::inc_proofs_total();
        debug!(index, root = %short(&path.root), "proof generated");
        Ok(path)
    }

    async fn lookup(&self, commitment_ref: &str) -> Option<(u64, FieldElement)> {
        self.commitments
            .read()
            .await
            .find_commitment(commitment_ref)
            .map(|e| (e.index, e.commitment))
    }

    pub async fn current_tree(&self) -> Option<Arc<Accumulator>> {
        self.tree.read().await.clone()
    }

    /// Root of the local tree, when it holds at least one leaf.
    pub async fn local_root(&self) -> Option<FieldElement> {
        self.current_tree()
            .await
            .filter(|t| !t.is_empty())
            .map(|t| t.root())
    }

    pub async fn indexed_leaves(&self) -> usize {
        self.commitments.read().await.len()
    }

    pub async fn dense_len(&self) -> u64 {
        self.commitments.read().await.dense_len()
    }

    pub async fn contains_output(&self, encrypted_output_hex: &str) -> bool {
        self.commitments
            .read()
            .await
            .contains_output(encrypted_output_hex)
    }

    /// Leaf index for each ciphertext, aligned with the input.
    pub async fn indices_for(&self, encrypted_outputs: &[String]) -> Vec<Option<u64>> {
        let index = self.commitments.read().await;
        encrypted_outputs
            .iter()
            .map(|o| index.get_by_output(o).map(|e| e.index))
            .collect()
    }

    pub async fn outputs_in_range(&self, start: u64, end: u64) -> Vec<String> {
        self.commitments.read().await.outputs_in_range(start, end)
    }

    /// Check for a ciphertext, rescanning up to `retries` times with `delay` before each pass.
    pub async fn wait_for_output(
        &self,
        encrypted_output_hex: &str,
        retries: u32,
        delay: Duration,
    ) -> bool {
        if self.contains_output(encrypted_output_hex).await {
            return true;
        }
        for attempt in 0..retries {
            tokio::time::sleep(delay).await;
            if let Err(e) = self.scan().await {
                warn!(attempt, error = %e, "rescan for output check failed");
            }
            if self.contains_output(encrypted_output_hex).await {
                return true;
            }
        }
        false
    }
}

/// Newest-first signature history, paged through `before`, capped at `max`.
fn fetch_history(
    chain: &dyn ChainClient,
    address: &Pubkey,
    max: usize,
) -> AppResult<Vec<SignatureInfo>> {
    let mut out: Vec<SignatureInfo> = Vec::new();
    let mut before = None;
    while out.len() < max {
        let limit = SIGNATURE_PAGE_LIMIT.min(max - out.len());
        let page = chain.signatures_for_address(address, before, limit)?;
        let n = page.len();
        before = page.last().map(|s| s.signature);
        out.extend(page);
        if n < limit {
            break;
        }
    }
    Ok(out)
}

fn capacity(levels: usize) -> u64 {
    if levels >= 64 {
        u64::MAX
    } else {
        1u64 << levels
    }
}

fn short(v: &FieldElement) -> String {
    let s = v.to_decimal_string();
    if s.len() > 16 {
        format!("{}...", &s[..16])
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::mock::MockChain;
    use crate::event::event_log_line;
    use crate::field::mock::LinearHasher;
    use crate::field::PoseidonHasher;
    use std::sync::atomic::Ordering;

    fn commitment(v: u8) -> [u8; 32] {
        let mut c = [0u8; 32];
        c[31] = v;
        c
    }

    fn indexer_with(chain: Arc<MockChain>, levels: usize) -> Indexer {
        Indexer::new(
            chain,
            Arc::new(LinearHasher),
            IndexerConfig {
                tree_account: Pubkey::new_unique(),
                levels,
                max_signatures: 1_000,
                filter: EventFilter::default(),
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn single_deposit_proof_folds_to_local_root() {
        let chain = Arc::new(MockChain::new());
        chain.push_tx(vec![event_log_line(0, commitment(42), &[0xEE, 0x01])]);
        let indexer = Indexer::new(
            chain,
            Arc::new(PoseidonHasher::new().unwrap()),
            IndexerConfig {
                tree_account: Pubkey::new_unique(),
                levels: 8,
                max_signatures: 1_000,
                filter: EventFilter::default(),
            },
        )
        .unwrap();

        let report = indexer.scan().await.unwrap();
        assert_eq!(report.new_entries, 1);
        assert!(report.rebuilt);

        let path = indexer.prove("42").await.unwrap();
        let root = indexer.local_root().await.unwrap();
        assert_eq!(path.root, root);
        let h = PoseidonHasher::new().unwrap();
        assert_eq!(path.fold(&FieldElement::from_u64(42), &h).unwrap(), root);
        assert!(indexer.contains_output("ee01").await);
    }

    #[tokio::test]
    async fn rescans_are_idempotent() {
        let chain = Arc::new(MockChain::new());
        chain.push_tx(vec![
            event_log_line(0, commitment(1), &[1]),
            event_log_line(1, commitment(2), &[2]),
        ]);
        let indexer = indexer_with(chain.clone(), 4);
        assert_eq!(indexer.scan().await.unwrap().new_entries, 2);

        let second = indexer.scan().await.unwrap();
        assert_eq!(second.new_entries, 0);
        assert_eq!(second.transactions, 0);
        assert!(!second.rebuilt);
        assert_eq!(indexer.indexed_leaves().await, 2);

        chain.push_tx(vec![event_log_line(2, commitment(3), &[3])]);
        let third = indexer.scan().await.unwrap();
        assert_eq!(third.new_entries, 1);
        assert!(third.rebuilt);
        assert_eq!(indexer.current_tree().await.unwrap().leaf_count(), 3);
    }

    #[tokio::test]
    async fn empty_history_still_builds_an_empty_tree() {
        let chain = Arc::new(MockChain::new());
        let indexer = indexer_with(chain, 4);
        let r = indexer.scan().await.unwrap();
        assert!(r.rebuilt);
        assert!(indexer.local_root().await.is_none());
        assert!(indexer.current_tree().await.unwrap().is_empty());
        assert!(!indexer.scan().await.unwrap().rebuilt);
    }

    #[tokio::test]
    async fn failed_and_broken_transactions_are_skipped() {
        let chain = Arc::new(MockChain::new());
        chain.push_failed_tx(vec![event_log_line(0, commitment(9), &[9])]);
        chain.push_broken_tx();
        chain.push_tx(vec![event_log_line(0, commitment(1), &[1])]);
        let indexer = indexer_with(chain.clone(), 4);

        let r = indexer.scan().await.unwrap();
        assert_eq!(r.new_entries, 1);
        assert_eq!(r.skipped, 1);
        assert!(!indexer.contains_output("09").await);

        // The broken one is retried on the next pass.
        let r = indexer.scan().await.unwrap();
        assert_eq!(r.skipped, 1);
    }

    #[tokio::test]
    async fn out_of_field_commitment_does_not_block_proofs() {
        let chain = Arc::new(MockChain::new());
        chain.push_tx(vec![event_log_line(0, [0xff; 32], &[0x01])]);
        chain.push_tx(vec![event_log_line(1, commitment(5), &[0x05])]);
        let indexer = Indexer::new(
            chain.clone(),
            Arc::new(PoseidonHasher::new().unwrap()),
            IndexerConfig {
                tree_account: Pubkey::new_unique(),
                levels: 4,
                max_signatures: 1_000,
                filter: EventFilter::default(),
            },
        )
        .unwrap();

        let report = indexer.scan().await.unwrap();
        assert_eq!(report.new_entries, 1);
        assert!(indexer.scan().await.is_ok());
        assert!(!indexer.contains_output("01").await);

        let path = indexer.prove("5").await.unwrap();
        assert_eq!(path.root, indexer.local_root().await.unwrap());
        let h = PoseidonHasher::new().unwrap();
        assert_eq!(path.fold(&FieldElement::from_u64(5), &h).unwrap(), path.root);
    }

    #[tokio::test]
    async fn transactions_without_logs_are_retried() {
        let chain = Arc::new(MockChain::new());
        let sig = chain.push_tx(vec![event_log_line(0, commitment(8), &[0x08])]);
        let logs = chain.take_logs(&sig);
        let indexer = indexer_with(chain.clone(), 4);

        let first = indexer.scan().await.unwrap();
        assert_eq!(first.skipped, 1);
        assert_eq!(first.new_entries, 0);

        chain.restore_logs(sig, logs);
        let second = indexer.scan().await.unwrap();
        assert_eq!(second.new_entries, 1);
        assert!(indexer.contains_output("08").await);
    }

    #[tokio::test]
    async fn gapped_indices_become_zero_leaves() {
        let chain = Arc::new(MockChain::new());
        chain.push_tx(vec![event_log_line(0, commitment(5), &[5])]);
        chain.push_tx(vec![event_log_line(2, commitment(7), &[7])]);
        let indexer = indexer_with(chain, 3);
        indexer.scan().await.unwrap();

        let tree = indexer.current_tree().await.unwrap();
        assert_eq!(tree.layer(0)[1], indexer.zeros().at(0));
        assert_eq!(indexer.dense_len().await, 3);
        let p = indexer.prove("7").await.unwrap();
        assert_eq!(p.path_indices, vec![0, 1, 0]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_scans_share_one_pass() {
        let chain = Arc::new(MockChain::new());
        chain.push_tx(vec![event_log_line(0, commitment(1), &[1])]);
        chain.set_signatures_delay(150);
        let indexer = Arc::new(indexer_with(chain.clone(), 4));

        let a = {
            let ix = indexer.clone();
            tokio::spawn(async move { ix.scan().await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        let b = {
            let ix = indexer.clone();
            tokio::spawn(async move { ix.scan().await })
        };
        let c = {
            let ix = indexer.clone();
            tokio::spawn(async move { ix.scan().await })
        };
        let ra = a.await.unwrap().unwrap();
        let rb = b.await.unwrap().unwrap();
        let rc = c.await.unwrap().unwrap();

        assert_eq!(chain.signature_calls.load(Ordering::SeqCst), 1);
        assert_eq!(ra, rb);
        assert_eq!(ra, rc);
        assert_eq!(indexer.indexed_leaves().await, 1);

        // Demand after the pass finished starts a fresh one.
        chain.set_signatures_delay(0);
        indexer.scan().await.unwrap();
        assert_eq!(chain.signature_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn prove_rescans_once_then_reports_not_found() {
        let chain = Arc::new(MockChain::new());
        let indexer = indexer_with(chain.clone(), 4);
        indexer.scan().await.unwrap();

        chain.push_tx(vec![event_log_line(0, commitment(3), &[3])]);
        // Not indexed yet: the proof call triggers the pass itself.
        assert!(indexer.prove("3").await.is_ok());

        let before = chain.signature_calls.load(Ordering::SeqCst);
        assert!(matches!(
            indexer.prove("4").await,
            Err(AppError::CommitmentNotFound(_))
        ));
        assert_eq!(chain.signature_calls.load(Ordering::SeqCst), before + 1);
    }

    #[tokio::test]
    async fn prove_accepts_hex_reference() {
        let chain = Arc::new(MockChain::new());
        chain.push_tx(vec![event_log_line(0, commitment(0xAB), &[1])]);
        let indexer = indexer_with(chain, 4);
        indexer.scan().await.unwrap();
        let by_dec = indexer.prove("171").await.unwrap();
        let by_hex = indexer
            .prove(&FieldElement::from_u64(0xAB).to_hex())
            .await
            .unwrap();
        assert_eq!(by_dec, by_hex);
    }

    #[tokio::test]
    async fn signature_failure_is_an_error_and_leaves_state_alone() {
        let chain = Arc::new(MockChain::new());
        chain.fail_signatures.store(true, Ordering::SeqCst);
        let indexer = indexer_with(chain.clone(), 4);
        assert!(indexer.scan().await.is_err());
        assert!(indexer.current_tree().await.is_none());

        chain.fail_signatures.store(false, Ordering::SeqCst);
        assert!(indexer.scan().await.is_ok());
    }

    #[tokio::test]
    async fn leaves_beyond_capacity_are_skipped() {
        let chain = Arc::new(MockChain::new());
        chain.push_tx(vec![
            event_log_line(3, commitment(1), &[1]),
            event_log_line(4, commitment(2), &[2]),
        ]);
        let indexer = indexer_with(chain, 2);
        let r = indexer.scan().await.unwrap();
        assert_eq!(r.new_entries, 1);
        assert_eq!(indexer.dense_len().await, 4);
    }

    #[tokio::test]
    async fn history_is_paged_and_capped() {
        let chain = Arc::new(MockChain::new());
        for i in 0..5u8 {
            chain.push_tx(vec![event_log_line(i as u64, commitment(i + 1), &[i + 1])]);
        }
        let history = fetch_history(chain.as_ref(), &Pubkey::new_unique(), 3).unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(chain.signature_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn wait_for_output_rescans_until_found() {
        let chain = Arc::new(MockChain::new());
        let indexer = indexer_with(chain.clone(), 4);
        indexer.scan().await.unwrap();
        assert!(!indexer.wait_for_output("0c", 2, Duration::from_millis(1)).await);

        chain.push_tx(vec![event_log_line(0, commitment(12), &[12])]);
        assert!(indexer.wait_for_output("0c", 2, Duration::from_millis(1)).await);
        assert_eq!(indexer.indices_for(&["0c".into(), "ff".into()]).await, vec![Some(0), None]);
    }
}
