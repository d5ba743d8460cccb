//! Transaction submission and confirmation polling.
//!
//! Deposits arrive fully signed by the user and are only broadcast. Withdrawals are assembled
//! here around the client's serialized proof instruction and signed by the executor key, since
//! the user cannot pay fees from a shielded balance.

use crate::chain::{ChainClient, SignatureStatus};
use crate::error::{AppError, AppResult};
use crate::metrics;
use base64::{engine::general_purpose, Engine as _};
use solana_sdk::compute_budget::ComputeBudgetInstruction;
use solana_sdk::instruction::{AccountMeta, Instruction};
use solana_sdk::message::{v0, AddressLookupTableAccount, VersionedMessage};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signature, Signer};
#[allow(deprecated)]
use solana_sdk::system_program;
use solana_sdk::transaction::VersionedTransaction;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy)]
pub struct ConfirmPolicy {
    pub max_attempts: u32,
    pub poll: Duration,
}

/// Accounts of the pool program's `transact` instruction, in program order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WithdrawAccounts {
    pub tree: Pubkey,
    pub nullifiers: [Pubkey; 4],
    pub tree_token: Pubkey,
    pub global_config: Pubkey,
    pub recipient: Pubkey,
    pub fee_recipient: Pubkey,
}

#[derive(Debug, Clone)]
pub struct WithdrawBundle {
    /// Complete instruction data (discriminator + proof + ext data) built by the client.
    pub instruction_data: Vec<u8>,
    pub accounts: WithdrawAccounts,
    pub lookup_table: Option<Pubkey>,
}

impl WithdrawAccounts {
    fn metas(&self, executor: Pubkey) -> Vec<AccountMeta> {
        vec![
            AccountMeta::new(self.tree, false),
            AccountMeta::new(self.nullifiers[0], false),
            AccountMeta::new(self.nullifiers[1], false),
            AccountMeta::new_readonly(self.nullifiers[2], false),
            AccountMeta::new_readonly(self.nullifiers[3], false),
            AccountMeta::new(self.tree_token, false),
            AccountMeta::new_readonly(self.global_config, false),
            AccountMeta::new(self.recipient, false),
            AccountMeta::new(self.fee_recipient, false),
            AccountMeta::new(executor, true),
            AccountMeta::new_readonly(system_program::id(), false),
        ]
    }
}

pub struct Relay {
    chain: Arc<dyn ChainClient>,
    program_id: Pubkey,
    executor: Option<Arc<Keypair>>,
    policy: ConfirmPolicy,
    compute_unit_limit: u32,
}

fn join_err(e: tokio::task::JoinError) -> AppError {
    AppError::Internal(format!("join error: {e}"))
}

impl Relay {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        program_id: Pubkey,
        executor: Option<Arc<Keypair>>,
        policy: ConfirmPolicy,
        compute_unit_limit: u32,
    ) -> Self {
        Self {
            chain,
            program_id,
            executor,
            policy,
            compute_unit_limit,
        }
    }

    pub fn executor_pubkey(&self) -> Option<Pubkey> {
        self.executor.as_ref().map(|k| k.pubkey())
    }

    /// Broadcast a user-signed transaction (base64 wire format) and wait for it.
    pub async fn submit_deposit(&self, signed_tx_b64: &str) -> AppResult<Signature> {
        let bytes = general_purpose::STANDARD
            .decode(signed_tx_b64.trim())
            .map_err(|e| AppError::BadRequest(format!("signedTransaction is not base64: {e}")))?;
        let tx: VersionedTransaction = bincode::deserialize(&bytes)
            .map_err(|e| AppError::BadRequest(format!("signedTransaction decode failed: {e}")))?;
        if tx.signatures.is_empty() {
            return Err(AppError::BadRequest("signedTransaction carries no signatures".into()));
        }
        self.send_and_confirm("deposit", tx).await
    }

    /// Build, sign, send and confirm a withdrawal on behalf of the client.
    pub async fn submit_withdraw(&self, bundle: WithdrawBundle) -> AppResult<Signature> {
        let executor = self.executor.clone().ok_or(AppError::ExecutorNotConfigured)?;
        let chain = self.chain.clone();
        let program_id = self.program_id;
        let cu_limit = self.compute_unit_limit;
        let tx = tokio::task::spawn_blocking(move || {
            build_withdraw_tx(chain.as_ref(), &executor, program_id, cu_limit, bundle)
        })
        .await
        .map_err(join_err)??;
        self.send_and_confirm("withdraw", tx).await
    }

    async fn send_and_confirm(
        &self,
        kind: &'static str,
        tx: VersionedTransaction,
    ) -> AppResult<Signature> {
        let chain = self.chain.clone();
        let sent = tokio::task::spawn_blocking(move || chain.send_transaction(&tx))
            .await
            .map_err(join_err)?;
        let signature = match sent {
            Ok(s) => s,
            Err(e) => {
                metrics::inc_submission(kind, "rejected");
                return Err(e);
            }
        };
        info!(kind, signature = %signature, "transaction submitted");

        let outcome = self.await_confirmation(signature).await;
        let label = match &outcome {
            Ok(_) => "confirmed",
            Err(AppError::TransactionFailed { .. }) => "failed",
            Err(AppError::ConfirmationTimeout { .. }) => "timeout",
            Err(_) => "rejected",
        };
        metrics::inc_submission(kind, label);
        match &outcome {
            Ok(_) => info!(kind, signature = %signature, "transaction confirmed"),
            Err(e) => warn!(kind, signature = %signature, error = %e, "transaction not confirmed"),
        }
        outcome
    }

    /// Poll the signature status a bounded number of times, sleeping before each poll.
    /// RPC errors while polling count as "not yet".
    pub async fn await_confirmation(&self, signature: Signature) -> AppResult<Signature> {
        for attempt in 0..self.policy.max_attempts {
            tokio::time::sleep(self.policy.poll).await;
            let chain = self.chain.clone();
            let status = tokio::task::spawn_blocking(move || chain.signature_status(&signature))
                .await
                .map_err(join_err)?;
            match status {
                Ok(SignatureStatus::Confirmed) => return Ok(signature),
                Ok(SignatureStatus::Failed(err)) => {
                    let details = serde_json::to_value(&err)
                        .unwrap_or_else(|_| serde_json::Value::String(err.to_string()));
                    return Err(AppError::TransactionFailed { signature, details });
                }
                Ok(SignatureStatus::Processing) => {}
                Err(e) => debug!(attempt, error = %e, "signature status poll failed"),
            }
        }
        Err(AppError::ConfirmationTimeout { signature })
    }
}

fn build_withdraw_tx(
    chain: &dyn ChainClient,
    executor: &Keypair,
    program_id: Pubkey,
    compute_unit_limit: u32,
    bundle: WithdrawBundle,
) -> AppResult<VersionedTransaction> {
    let payer = executor.pubkey();
    let instructions = [
        ComputeBudgetInstruction::set_compute_unit_limit(compute_unit_limit),
        Instruction {
            program_id,
            accounts: bundle.accounts.metas(payer),
            data: bundle.instruction_data,
        },
    ];

    let mut tables: Vec<AddressLookupTableAccount> = Vec::new();
    if let Some(alt) = bundle.lookup_table {
        match chain.lookup_table(&alt) {
            Ok(Some(t)) => tables.push(t),
            Ok(None) => warn!(lookup_table = %alt, "lookup table not found; building without it"),
            Err(e) => warn!(lookup_table = %alt, error = %e, "could not load lookup table; building without it"),
        }
    }

    let blockhash = chain.latest_blockhash()?;
    let message = v0::Message::try_compile(&payer, &instructions, &tables, blockhash)
        .map_err(|e| AppError::BadRequest(format!("withdraw message compile failed: {e}")))?;
    VersionedTransaction::try_new(VersionedMessage::V0(message), &[executor])
        .map_err(|e| AppError::Internal(format!("withdraw signing failed: {e}")))
}
