//! Solana RPC access behind a small blocking trait.
//!
//! Everything here is synchronous (`solana_client::rpc_client::RpcClient`); async callers go
//! through `tokio::task::spawn_blocking`.

use crate::error::{AppError, AppResult};
use solana_client::rpc_client::{GetConfirmedSignaturesForAddress2Config, RpcClient};
use solana_client::rpc_config::{RpcSendTransactionConfig, RpcTransactionConfig};
use solana_sdk::address_lookup_table::state::AddressLookupTable;
use solana_sdk::commitment_config::{CommitmentConfig, CommitmentLevel};
use solana_sdk::hash::Hash;
use solana_sdk::message::AddressLookupTableAccount;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::{TransactionError, VersionedTransaction};
use solana_transaction_status::option_serializer::OptionSerializer;
use solana_transaction_status::{TransactionConfirmationStatus, UiTransactionEncoding};
use std::str::FromStr;
use std::time::Duration;

use crate::constants::SEND_MAX_RETRIES;

/// One entry of a `getSignaturesForAddress` page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureInfo {
    pub signature: Signature,
    /// The transaction executed with an error; it emitted no events worth reading.
    pub failed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureStatus {
    /// Unknown to the cluster yet, or seen but not confirmed.
    Processing,
    Confirmed,
    Failed(TransactionError),
}

pub trait ChainClient: Send + Sync {
    /// `None` when the account does not exist.
    fn account_data(&self, address: &Pubkey) -> AppResult<Option<Vec<u8>>>;

    /// Newest first, starting strictly before `before` when given.
    fn signatures_for_address(
        &self,
        address: &Pubkey,
        before: Option<Signature>,
        limit: usize,
    ) -> AppResult<Vec<SignatureInfo>>;

    /// `None` when the transaction carries no log messages.
    fn transaction_logs(&self, signature: &Signature) -> AppResult<Option<Vec<String>>>;

    fn latest_blockhash(&self) -> AppResult<Hash>;

    fn send_transaction(&self, tx: &VersionedTransaction) -> AppResult<Signature>;

    fn signature_status(&self, signature: &Signature) -> AppResult<SignatureStatus>;

    fn lookup_table(&self, address: &Pubkey) -> AppResult<Option<AddressLookupTableAccount>>;
}

pub struct RpcChain {
    rpc: RpcClient,
    commitment: CommitmentConfig,
}

impl RpcChain {
    pub fn new(rpc_url: String, timeout: Duration) -> Self {
        let commitment = CommitmentConfig::confirmed();
        Self {
            rpc: RpcClient::new_with_timeout_and_commitment(rpc_url, timeout, commitment),
            commitment,
        }
    }
}

fn gateway(what: &str, e: impl std::fmt::Display) -> AppError {
    AppError::BadGateway(format!("{what} failed: {e}"))
}

impl ChainClient for RpcChain {
    fn account_data(&self, address: &Pubkey) -> AppResult<Option<Vec<u8>>> {
        let resp = self
            .rpc
            .get_account_with_commitment(address, self.commitment)
            .map_err(|e| gateway("getAccountInfo", e))?;
        Ok(resp.value.map(|a| a.data))
    }

    fn signatures_for_address(
        &self,
        address: &Pubkey,
        before: Option<Signature>,
        limit: usize,
    ) -> AppResult<Vec<SignatureInfo>> {
        let cfg = GetConfirmedSignaturesForAddress2Config {
            before,
            until: None,
            limit: Some(limit),
            commitment: Some(self.commitment),
        };
        let page = self
            .rpc
            .get_signatures_for_address_with_config(address, cfg)
            .map_err(|e| gateway("getSignaturesForAddress", e))?;
        page.into_iter()
            .map(|s| {
                let signature = Signature::from_str(&s.signature)
                    .map_err(|e| gateway("signature parse", e))?;
                Ok(SignatureInfo {
                    signature,
                    failed: s.err.is_some(),
                })
            })
            .collect()
    }

    fn transaction_logs(&self, signature: &Signature) -> AppResult<Option<Vec<String>>> {
        let cfg = RpcTransactionConfig {
            encoding: Some(UiTransactionEncoding::Json),
            commitment: Some(self.commitment),
            max_supported_transaction_version: Some(0),
        };
        let tx = self
            .rpc
            .get_transaction_with_config(signature, cfg)
            .map_err(|e| gateway("getTransaction", e))?;
        let logs = tx.transaction.meta.and_then(|m| match m.log_messages {
            OptionSerializer::Some(logs) => Some(logs),
            _ => None,
        });
        Ok(logs)
    }

    fn latest_blockhash(&self) -> AppResult<Hash> {
        self.rpc
            .get_latest_blockhash()
            .map_err(|e| gateway("getLatestBlockhash", e))
    }

    fn send_transaction(&self, tx: &VersionedTransaction) -> AppResult<Signature> {
        let cfg = RpcSendTransactionConfig {
            skip_preflight: false,
            preflight_commitment: Some(CommitmentLevel::Confirmed),
            max_retries: Some(SEND_MAX_RETRIES),
            ..RpcSendTransactionConfig::default()
        };
        self.rpc
            .send_transaction_with_config(tx, cfg)
            .map_err(|e| gateway("sendTransaction", e))
    }

    fn signature_status(&self, signature: &Signature) -> AppResult<SignatureStatus> {
        let st = self
            .rpc
            .get_signature_statuses(&[*signature])
            .map_err(|e| gateway("getSignatureStatuses", e))?;
        let Some(s0) = st.value.into_iter().next().flatten() else {
            return Ok(SignatureStatus::Processing);
        };
        if let Some(err) = s0.err {
            return Ok(SignatureStatus::Failed(err));
        }
        // `confirmations == None` means rooted.
        let confirmed = matches!(
            s0.confirmation_status,
            Some(TransactionConfirmationStatus::Confirmed | TransactionConfirmationStatus::Finalized)
        ) || s0.confirmations.is_none();
        Ok(if confirmed {
            SignatureStatus::Confirmed
        } else {
            SignatureStatus::Processing
        })
    }

    fn lookup_table(&self, address: &Pubkey) -> AppResult<Option<AddressLookupTableAccount>> {
        let Some(data) = self.account_data(address)? else {
            return Ok(None);
        };
        let table = AddressLookupTable::deserialize(&data)
            .map_err(|e| gateway("lookup table decode", e))?;
        Ok(Some(AddressLookupTableAccount {
            key: *address,
            addresses: table.addresses.to_vec(),
        }))
    }
}
