use crate::constants::MAX_INDICES_BATCH;
use crate::error::AppError;
use crate::field::FieldElement;
use crate::relay::{WithdrawAccounts, WithdrawBundle};
use crate::validation::{parse_optional_pubkey, parse_pubkey};
use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct ConfigResponse {
    pub withdraw_fee_rate: f64,
    pub withdraw_rent_fee: f64,
    pub deposit_fee_rate: f64,
    pub max_deposit_amount: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositRequest {
    #[serde(default)]
    pub signed_transaction: Option<String>,
    /// Informational only; the signed transaction is authoritative.
    #[serde(default)]
    pub sender_address: Option<String>,
}

impl DepositRequest {
    pub fn signed_transaction(&self) -> Result<&str, AppError> {
        self.signed_transaction
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AppError::BadRequest("Missing signedTransaction".into()))
    }
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub success: bool,
    pub signature: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawRequest {
    pub serialized_proof: String,
    pub tree_account: String,
    #[serde(rename = "nullifier0PDA")]
    pub nullifier0_pda: String,
    #[serde(rename = "nullifier1PDA")]
    pub nullifier1_pda: String,
    #[serde(rename = "nullifier2PDA")]
    pub nullifier2_pda: String,
    #[serde(rename = "nullifier3PDA")]
    pub nullifier3_pda: String,
    pub tree_token_account: String,
    pub global_config_account: String,
    pub recipient: String,
    pub fee_recipient_account: String,
    #[serde(default)]
    pub lookup_table_address: Option<String>,
    #[serde(default)]
    pub sender_address: Option<String>,
}

impl WithdrawRequest {
    pub fn into_bundle(self) -> Result<WithdrawBundle, AppError> {
        let instruction_data = general_purpose::STANDARD
            .decode(self.serialized_proof.trim())
            .map_err(|e| AppError::BadRequest(format!("serializedProof is not base64: {e}")))?;
        if instruction_data.is_empty() {
            return Err(AppError::BadRequest("serializedProof is empty".into()));
        }
        Ok(WithdrawBundle {
            instruction_data,
            accounts: WithdrawAccounts {
                tree: parse_pubkey("treeAccount", &self.tree_account)?,
                nullifiers: [
                    parse_pubkey("nullifier0PDA", &self.nullifier0_pda)?,
                    parse_pubkey("nullifier1PDA", &self.nullifier1_pda)?,
                    parse_pubkey("nullifier2PDA", &self.nullifier2_pda)?,
                    parse_pubkey("nullifier3PDA", &self.nullifier3_pda)?,
                ],
                tree_token: parse_pubkey("treeTokenAccount", &self.tree_token_account)?,
                global_config: parse_pubkey("globalConfigAccount", &self.global_config_account)?,
                recipient: parse_pubkey("recipient", &self.recipient)?,
                fee_recipient: parse_pubkey("feeRecipientAccount", &self.fee_recipient_account)?,
            },
            lookup_table: parse_optional_pubkey(
                "lookupTableAddress",
                self.lookup_table_address.as_deref(),
            )?,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    pub start: Option<String>,
    pub end: Option<String>,
}

#[derive(Debug, Serialize, Default)]
pub struct RangeResponse {
    pub encrypted_outputs: Vec<String>,
    #[serde(rename = "hasMore")]
    pub has_more: bool,
    pub total: u64,
}

#[derive(Debug, Deserialize)]
pub struct IndicesRequest {
    #[serde(default)]
    pub encrypted_outputs: Option<Vec<String>>,
}

impl IndicesRequest {
    pub fn outputs(&self) -> Result<&[String], AppError> {
        let outs = self
            .encrypted_outputs
            .as_deref()
            .ok_or_else(|| AppError::BadRequest("Missing encrypted_outputs array".into()))?;
        if outs.len() > MAX_INDICES_BATCH {
            return Err(AppError::BadRequest(format!(
                "encrypted_outputs too large: {} (max {MAX_INDICES_BATCH})",
                outs.len()
            )));
        }
        Ok(outs)
    }
}

#[derive(Debug, Serialize)]
pub struct IndicesResponse {
    pub indices: Vec<Option<u64>>,
}

#[derive(Debug, Serialize)]
pub struct ExistsResponse {
    pub exists: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RootResponse {
    pub root: FieldElement,
    pub next_index: u64,
}

#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    pub ready: bool,
    pub executor_pubkey: Option<String>,
    pub indexed_leaves: usize,
    pub local_root: Option<FieldElement>,
    pub onchain_root: Option<FieldElement>,
    pub onchain_next_index: Option<u64>,
    pub local_root_known_on_chain: Option<bool>,
}
