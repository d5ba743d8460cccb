use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::Registry;
use std::sync::OnceLock;

use crate::state::AppState;

#[derive(Debug, Clone, Hash, PartialEq, Eq, prometheus_client::encoding::EncodeLabelSet)]
pub struct Submission {
    pub kind: &'static str,    // "deposit" | "withdraw"
    pub outcome: &'static str, // "confirmed" | "failed" | "timeout" | "rejected"
}

pub struct Metrics {
    registry: Registry,
    pub executor_ready: Gauge<i64>,
    pub indexed_leaves: Gauge<i64>,
    pub scans_total: Counter,
    pub scan_tx_errors_total: Counter,
    pub commitments_indexed_total: Counter,
    pub proofs_total: Counter,
    pub proof_self_check_failures_total: Counter,
    pub submissions_total: Family<Submission, Counter>,
    pub tree_rebuild_ms: Histogram,
}

fn buckets_ms() -> Vec<f64> {
    vec![
        1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10_000.0,
        30_000.0,
    ]
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

pub fn metrics() -> &'static Metrics {
    METRICS.get_or_init(|| {
        let mut registry = Registry::default();

        let executor_ready = Gauge::<i64>::default();
        registry.register(
            "relayer_executor_ready",
            "Executor keypair configured (1=withdrawals can be relayed)",
            executor_ready.clone(),
        );
        let indexed_leaves = Gauge::<i64>::default();
        registry.register(
            "relayer_indexed_leaves",
            "Commitments held in the local index",
            indexed_leaves.clone(),
        );

        let scans_total = Counter::default();
        registry.register(
            "relayer_scans_total",
            "Completed chain scans",
            scans_total.clone(),
        );
        let scan_tx_errors_total = Counter::default();
        registry.register(
            "relayer_scan_tx_errors_total",
            "Transactions skipped during a scan because they could not be fetched",
            scan_tx_errors_total.clone(),
        );
        let commitments_indexed_total = Counter::default();
        registry.register(
            "relayer_commitments_indexed_total",
            "New commitments recorded by scans",
            commitments_indexed_total.clone(),
        );
        let proofs_total = Counter::default();
        registry.register(
            "relayer_proofs_total",
            "Merkle proofs served",
            proofs_total.clone(),
        );
        let proof_self_check_failures_total = Counter::default();
        registry.register(
            "relayer_proof_self_check_failures_total",
            "Derived paths that did not fold back to the accumulator root",
            proof_self_check_failures_total.clone(),
        );

        let submissions_total: Family<Submission, Counter> = Family::default();
        registry.register(
            "relayer_submissions_total",
            "Submitted transactions (labeled by kind and outcome)",
            submissions_total.clone(),
        );

        let tree_rebuild_ms = Histogram::new(buckets_ms().into_iter());
        registry.register(
            "relayer_tree_rebuild_ms",
            "Accumulator rebuild time (ms)",
            tree_rebuild_ms.clone(),
        );

        Metrics {
            registry,
            executor_ready,
            indexed_leaves,
            scans_total,
            scan_tx_errors_total,
            commitments_indexed_total,
            proofs_total,
            proof_self_check_failures_total,
            submissions_total,
            tree_rebuild_ms,
        }
    })
}

pub fn inc_scans_total() {
    metrics().scans_total.inc();
}

pub fn inc_scan_tx_errors_total() {
    metrics().scan_tx_errors_total.inc();
}

pub fn add_commitments_indexed(n: u64) {
    metrics().commitments_indexed_total.inc_by(n);
}

pub fn inc_proofs_total() {
    metrics().proofs_total.inc();
}

pub fn inc_proof_self_check_failures_total() {
    metrics().proof_self_check_failures_total.inc();
}

pub fn inc_submission(kind: &'static str, outcome: &'static str) {
    metrics()
        .submissions_total
        .get_or_create(&Submission { kind, outcome })
        .inc();
}

pub fn observe_tree_rebuild_ms(ms: u128) {
    metrics().tree_rebuild_ms.observe(ms as f64);
}

pub async fn metrics_handler(State(state): State<std::sync::Arc<AppState>>) -> impl IntoResponse {
    let m = metrics();
    m.executor_ready
        .set(if state.executor.is_some() { 1 } else { 0 });
    m.indexed_leaves
        .set(state.indexer.indexed_leaves().await as i64);

    let mut out = String::new();
    if let Err(e) = encode(&mut out, &m.registry) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("encode metrics failed: {e}"),
        )
            .into_response();
    }
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        out,
    )
        .into_response()
}
