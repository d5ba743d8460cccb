use crate::auth;
use crate::constants::MAX_BODY_BYTES;
use crate::handlers;
use crate::state::AppState;
use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub fn build(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let public_routes = Router::new()
        .route("/config", get(handlers::public::get_config))
        .route("/ready", get(handlers::public::readiness))
        .route("/deposit", post(handlers::relay::deposit))
        .route("/withdraw", post(handlers::relay::withdraw))
        .route("/utxos/range", get(handlers::utxos::range))
        .route("/utxos/indices", post(handlers::utxos::indices))
        .route("/utxos/check/:encrypted_output", get(handlers::utxos::check))
        .route("/merkle/root", get(handlers::public::merkle_root))
        .route("/merkle/proof/:commitment", get(handlers::public::merkle_proof));

    let mut app = Router::new().merge(public_routes);
    if state.admin_token.is_some() {
        let admin_routes = Router::new()
            .route("/metrics", get(crate::metrics::metrics_handler))
            .route_layer(middleware::from_fn_with_state(
                state.clone(),
                auth::require_admin_token,
            ));
        app = app.merge(admin_routes);
    }

    app.with_state(state)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::mock::MockChain;
    use crate::chain::{ChainClient, SignatureStatus};
    use crate::config::FeeConfig;
    use crate::event::{event_log_line, EventFilter};
    use crate::field::mock::LinearHasher;
    use crate::field::{FieldElement, FieldHasher};
    use crate::indexer::{Indexer, IndexerConfig};
    use crate::merkle::MerklePath;
    use crate::relay::{ConfirmPolicy, Relay};
    use crate::state_cache::StateCache;
    use crate::tree_account::{encode_tree_account, TreeAccountLayout};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use base64::{engine::general_purpose, Engine as _};
    use solana_sdk::pubkey::Pubkey;
    use solana_sdk::signature::{Keypair, Signer};
    use std::time::Duration;
    use tower::ServiceExt;

    const LEVELS: usize = 4;

    struct Harness {
        chain: Arc<MockChain>,
        tree: Pubkey,
        layout: TreeAccountLayout,
        state: Arc<AppState>,
    }

    fn harness(admin_token: Option<&str>, executor: Option<Arc<Keypair>>) -> Harness {
        let chain = Arc::new(MockChain::new());
        let tree = Pubkey::new_unique();
        let layout = TreeAccountLayout::new(LEVELS, 4);
        let dyn_chain: Arc<dyn ChainClient> = chain.clone();
        let indexer = Indexer::new(
            dyn_chain.clone(),
            Arc::new(LinearHasher),
            IndexerConfig {
                tree_account: tree,
                levels: LEVELS,
                max_signatures: 1_000,
                filter: EventFilter::default(),
            },
        )
        .unwrap();
        let policy = ConfirmPolicy {
            max_attempts: 2,
            poll: Duration::from_millis(1),
        };
        let state = Arc::new(AppState {
            indexer: Arc::new(indexer),
            state_cache: StateCache::new(dyn_chain.clone(), tree, layout, Duration::ZERO),
            relay: Relay::new(
                dyn_chain,
                Pubkey::new_unique(),
                executor.clone(),
                policy,
                1_000_000,
            ),
            executor,
            admin_token: admin_token.map(str::to_string),
            fees: FeeConfig::default(),
            post_submit_index_delay: Duration::ZERO,
            utxo_check_retries: 1,
            utxo_check_retry_delay: Duration::from_millis(1),
        });
        Harness {
            chain,
            tree,
            layout,
            state,
        }
    }

    impl Harness {
        fn set_tree(&self, next_index: u64, root: FieldElement) {
            self.chain.set_account(
                self.tree,
                encode_tree_account(&self.layout, next_index, root.to_be_bytes(), &[], 5_000),
            );
        }

        async fn get(&self, uri: &str) -> (StatusCode, serde_json::Value) {
            let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
            self.send(req).await
        }

        async fn post(&self, uri: &str, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
            let req = Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap();
            self.send(req).await
        }

        async fn send(&self, req: Request<Body>) -> (StatusCode, serde_json::Value) {
            let resp = build(self.state.clone()).oneshot(req).await.unwrap();
            let status = resp.status();
            let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
                .await
                .unwrap();
            let v = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
            (status, v)
        }
    }

    fn commitment(v: u8) -> [u8; 32] {
        let mut c = [0u8; 32];
        c[31] = v;
        c
    }

    #[tokio::test]
    async fn single_deposit_end_to_end() {
        let h = harness(None, None);
        h.chain
            .push_tx(vec![event_log_line(0, commitment(77), &[0xE0, 0x0E])]);
        h.set_tree(1, FieldElement::from_u64(1));
        h.state.indexer.scan().await.unwrap();

        let (s, root) = h.get("/merkle/root").await;
        assert_eq!(s, StatusCode::OK);
        assert_eq!(root["nextIndex"], 1);

        let (s, proof) = h.get("/merkle/proof/77").await;
        assert_eq!(s, StatusCode::OK);
        assert_eq!(proof["root"], root["root"]);
        let path = MerklePath {
            path_elements: proof["pathElements"]
                .as_array()
                .unwrap()
                .iter()
                .map(|v| FieldElement::from_decimal(v.as_str().unwrap()).unwrap())
                .collect(),
            path_indices: proof["pathIndices"]
                .as_array()
                .unwrap()
                .iter()
                .map(|v| v.as_u64().unwrap() as u8)
                .collect(),
            root: FieldElement::from_decimal(root["root"].as_str().unwrap()).unwrap(),
        };
        let folded = path
            .fold(&FieldElement::from_u64(77), &LinearHasher as &dyn FieldHasher)
            .unwrap();
        assert_eq!(folded, path.root);

        let (s, check) = h.get("/utxos/check/e00e").await;
        assert_eq!(s, StatusCode::OK);
        assert_eq!(check["exists"], true);
    }

    #[tokio::test]
    async fn merkle_root_falls_back_to_chain_when_local_tree_is_empty() {
        let h = harness(None, None);
        h.set_tree(0, FieldElement::from_u64(31337));
        let (s, v) = h.get("/merkle/root").await;
        assert_eq!(s, StatusCode::OK);
        assert_eq!(v["root"], "31337");
        assert_eq!(v["nextIndex"], 0);
    }

    #[tokio::test]
    async fn merkle_root_without_tree_account_is_unavailable() {
        let h = harness(None, None);
        let (s, v) = h.get("/merkle/root").await;
        assert_eq!(s, StatusCode::SERVICE_UNAVAILABLE);
        assert!(v["error"].as_str().unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn range_query_pages_and_reports_more() {
        let h = harness(None, None);
        h.chain.push_tx(vec![
            event_log_line(0, commitment(1), &[0xA1]),
            event_log_line(1, commitment(2), &[0xA2]),
            event_log_line(2, commitment(3), &[0xA3]),
        ]);
        h.set_tree(3, FieldElement::from_u64(1));
        h.state.indexer.scan().await.unwrap();

        let (s, v) = h.get("/utxos/range?start=0&end=2").await;
        assert_eq!(s, StatusCode::OK);
        assert_eq!(v["encrypted_outputs"], serde_json::json!(["a1", "a2"]));
        assert_eq!(v["hasMore"], true);
        assert_eq!(v["total"], 3);

        let (_, v) = h.get("/utxos/range?start=2").await;
        assert_eq!(v["encrypted_outputs"], serde_json::json!(["a3"]));
        assert_eq!(v["hasMore"], false);
    }

    #[tokio::test]
    async fn range_total_uses_local_length_without_chain_state() {
        let h = harness(None, None);
        h.chain
            .push_tx(vec![event_log_line(4, commitment(1), &[0xB0])]);
        h.state.indexer.scan().await.unwrap();
        let (s, v) = h.get("/utxos/range?start=junk").await;
        assert_eq!(s, StatusCode::OK);
        assert_eq!(v["total"], 5);
        assert_eq!(v["encrypted_outputs"], serde_json::json!(["b0"]));
    }

    #[tokio::test]
    async fn indices_align_with_input_and_require_the_array() {
        let h = harness(None, None);
        h.chain.push_tx(vec![
            event_log_line(0, commitment(1), &[0xC1]),
            event_log_line(1, commitment(2), &[0xC2]),
        ]);
        h.state.indexer.scan().await.unwrap();

        let (s, v) = h
            .post(
                "/utxos/indices",
                serde_json::json!({"encrypted_outputs": ["c2", "ff", "c1"]}),
            )
            .await;
        assert_eq!(s, StatusCode::OK);
        assert_eq!(v["indices"], serde_json::json!([1, null, 0]));

        let (s, v) = h.post("/utxos/indices", serde_json::json!({})).await;
        assert_eq!(s, StatusCode::BAD_REQUEST);
        assert_eq!(v["error"], "Missing encrypted_outputs array");
    }

    #[tokio::test]
    async fn indices_match_regardless_of_hex_case() {
        let h = harness(None, None);
        h.chain
            .push_tx(vec![event_log_line(0, commitment(1), &[0xAB, 0xCD])]);
        h.state.indexer.scan().await.unwrap();

        let (s, v) = h
            .post(
                "/utxos/indices",
                serde_json::json!({"encrypted_outputs": ["ABCD", " abcd "]}),
            )
            .await;
        assert_eq!(s, StatusCode::OK);
        assert_eq!(v["indices"], serde_json::json!([0, 0]));
    }

    #[tokio::test]
    async fn malformed_bodies_answer_json_bad_request() {
        let h = harness(None, Some(Arc::new(Keypair::new())));

        let (s, v) = h
            .post("/utxos/indices", serde_json::json!({"encrypted_outputs": "abc"}))
            .await;
        assert_eq!(s, StatusCode::BAD_REQUEST);
        assert_eq!(v["error"], "Missing encrypted_outputs array");

        let (s, v) = h
            .post("/withdraw", serde_json::json!({"serializedProof": "AQID"}))
            .await;
        assert_eq!(s, StatusCode::BAD_REQUEST);
        assert!(v["error"].as_str().unwrap().contains("treeAccount"));

        let req = Request::builder()
            .method("POST")
            .uri("/deposit")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let (s, v) = h.send(req).await;
        assert_eq!(s, StatusCode::BAD_REQUEST);
        assert!(v["error"].is_string());
        assert!(h.chain.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn check_unknown_output_rescans_then_reports_false() {
        let h = harness(None, None);
        let (_, v) = h.get("/utxos/check/dead").await;
        assert_eq!(v["exists"], false);
        assert_eq!(
            h.chain
                .signature_calls
                .load(std::sync::atomic::Ordering::SeqCst),
            1
        );
        let (_, v) = h.get("/utxos/check/not-hex").await;
        assert_eq!(v["exists"], false);
    }

    #[tokio::test]
    async fn unknown_commitment_is_not_found() {
        let h = harness(None, None);
        let (s, v) = h.get("/merkle/proof/12345").await;
        assert_eq!(s, StatusCode::NOT_FOUND);
        assert!(v["error"].as_str().unwrap().contains("12345"));
    }

    #[tokio::test]
    async fn config_serves_chain_max_deposit_or_defaults() {
        let h = harness(None, None);
        let (s, v) = h.get("/config").await;
        assert_eq!(s, StatusCode::OK);
        assert_eq!(v["max_deposit_amount"], 1_000_000_000_000u64);
        assert_eq!(v["withdraw_fee_rate"], 0.0025);
        assert_eq!(v["deposit_fee_rate"], 0.0);

        h.set_tree(0, FieldElement::from_u64(1));
        let (_, v) = h.get("/config").await;
        assert_eq!(v["max_deposit_amount"], 5_000);
    }

    #[tokio::test]
    async fn deposit_confirms_then_indexes() {
        let h = harness(None, None);
        h.chain.set_send_status(SignatureStatus::Confirmed);
        h.chain
            .set_send_logs(vec![event_log_line(0, commitment(9), &[0xD9])]);

        let payer = Keypair::new();
        let ix = solana_sdk::system_instruction::transfer(&payer.pubkey(), &Pubkey::new_unique(), 1);
        let msg = solana_sdk::message::Message::new(&[ix], Some(&payer.pubkey()));
        let tx = solana_sdk::transaction::Transaction::new(
            &[&payer],
            msg,
            solana_sdk::hash::Hash::new_from_array([3u8; 32]),
        );
        let vtx = solana_sdk::transaction::VersionedTransaction::from(tx);
        let b64 = general_purpose::STANDARD.encode(bincode::serialize(&vtx).unwrap());

        let (s, v) = h
            .post(
                "/deposit",
                serde_json::json!({"signedTransaction": b64, "senderAddress": payer.pubkey().to_string()}),
            )
            .await;
        assert_eq!(s, StatusCode::OK);
        assert_eq!(v["success"], true);
        assert_eq!(v["signature"], vtx.signatures[0].to_string());
        assert!(h.state.indexer.contains_output("d9").await);
    }

    #[tokio::test]
    async fn deposit_timeout_surfaces_signature() {
        let h = harness(None, None);
        let payer = Keypair::new();
        let ix = solana_sdk::system_instruction::transfer(&payer.pubkey(), &Pubkey::new_unique(), 1);
        let msg = solana_sdk::message::Message::new(&[ix], Some(&payer.pubkey()));
        let tx = solana_sdk::transaction::Transaction::new(
            &[&payer],
            msg,
            solana_sdk::hash::Hash::new_from_array([4u8; 32]),
        );
        let sig = tx.signatures[0];
        let vtx = solana_sdk::transaction::VersionedTransaction::from(tx);
        let b64 = general_purpose::STANDARD.encode(bincode::serialize(&vtx).unwrap());

        let (s, v) = h
            .post("/deposit", serde_json::json!({"signedTransaction": b64}))
            .await;
        assert_eq!(s, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(v["signature"], sig.to_string());
    }

    #[tokio::test]
    async fn deposit_requires_signed_transaction() {
        let h = harness(None, None);
        let (s, v) = h.post("/deposit", serde_json::json!({})).await;
        assert_eq!(s, StatusCode::BAD_REQUEST);
        assert_eq!(v["error"], "Missing signedTransaction");
    }

    #[tokio::test]
    async fn withdraw_without_executor_is_unavailable() {
        let h = harness(None, None);
        let k = || Pubkey::new_unique().to_string();
        let body = serde_json::json!({
            "serializedProof": "AQID",
            "treeAccount": k(),
            "nullifier0PDA": k(),
            "nullifier1PDA": k(),
            "nullifier2PDA": k(),
            "nullifier3PDA": k(),
            "treeTokenAccount": k(),
            "globalConfigAccount": k(),
            "recipient": k(),
            "feeRecipientAccount": k(),
        });
        let (s, v) = h.post("/withdraw", body.clone()).await;
        assert_eq!(s, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(v["error"], "Executor keypair not configured");

        let h = harness(None, Some(Arc::new(Keypair::new())));
        h.chain.set_send_status(SignatureStatus::Confirmed);
        let (s, v) = h.post("/withdraw", body).await;
        assert_eq!(s, StatusCode::OK);
        assert_eq!(v["success"], true);
    }

    #[tokio::test]
    async fn metrics_require_admin_token() {
        let h = harness(None, None);
        let (s, _) = h.get("/metrics").await;
        assert_eq!(s, StatusCode::NOT_FOUND);

        let h = harness(Some("s3cret"), None);
        let (s, _) = h.get("/metrics").await;
        assert_eq!(s, StatusCode::FORBIDDEN);

        let req = Request::builder()
            .uri("/metrics")
            .header("authorization", "Bearer s3cret")
            .body(Body::empty())
            .unwrap();
        let resp = build(h.state.clone()).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn ready_reports_root_agreement() {
        let h = harness(None, Some(Arc::new(Keypair::new())));
        h.chain
            .push_tx(vec![event_log_line(0, commitment(5), &[0x05])]);
        h.state.indexer.scan().await.unwrap();
        let local = h.state.indexer.local_root().await.unwrap();
        h.set_tree(1, local);

        let (s, v) = h.get("/ready").await;
        assert_eq!(s, StatusCode::OK);
        assert_eq!(v["ready"], true);
        assert_eq!(v["indexed_leaves"], 1);
        assert_eq!(v["local_root_known_on_chain"], true);
        assert!(v["executor_pubkey"].is_string());
    }
}
