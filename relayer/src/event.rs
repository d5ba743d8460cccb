//! `CommitmentInserted` event decoding from transaction log lines.
//!
//! Anchor emits events as `Program data: <base64>`. Payload layout:
//!
//! ```text
//! [0..8)          discriminator
//! [8..16)         index            u64 LE
//! [16..48)        commitment       32 bytes, read as a big-endian field element
//! [48..52)        enc_len          u32 LE
//! [52..52+len)    encrypted_output
//! ```
//!
//! Anything that does not fit this shape is a foreign log line and is skipped, never an error.

use crate::constants::{DEFAULT_EVENT_MAX_ENCRYPTED_LEN, PROGRAM_DATA_PREFIX};
use crate::field::FieldElement;
use base64::{engine::general_purpose, Engine as _};

const DISCRIMINATOR_LEN: usize = 8;
const INDEX_END: usize = DISCRIMINATOR_LEN + 8;
const COMMITMENT_END: usize = INDEX_END + 32;
const ENC_LEN_END: usize = COMMITMENT_END + 4;

/// One leaf as emitted by the pool program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitmentEntry {
    pub index: u64,
    pub commitment: FieldElement,
    pub encrypted_output: Vec<u8>,
}

impl CommitmentEntry {
    pub fn encrypted_output_hex(&self) -> String {
        hex::encode(&self.encrypted_output)
    }
}

/// Validity heuristic for telling real events apart from coincidental byte patterns.
#[derive(Debug, Clone)]
pub struct EventFilter {
    /// Exclusive upper bound on `enc_len`.
    pub max_encrypted_len: u32,
    /// When set, the first 8 bytes must equal this value.
    pub discriminator: Option<[u8; 8]>,
}

impl Default for EventFilter {
    fn default() -> Self {
        Self {
            max_encrypted_len: DEFAULT_EVENT_MAX_ENCRYPTED_LEN,
            discriminator: None,
        }
    }
}

/// Anchor event discriminator = first 8 bytes of sha256("event:<Name>").
pub fn anchor_event_discriminator(name: &str) -> [u8; 8] {
    let h = solana_sdk::hash::hash(format!("event:{name}").as_bytes()).to_bytes();
    let mut out = [0u8; 8];
    out.copy_from_slice(&h[..8]);
    out
}

pub fn decode_commitment_event(data: &[u8], filter: &EventFilter) -> Option<CommitmentEntry> {
    if data.len() <= ENC_LEN_END {
        return None;
    }
    if let Some(disc) = filter.discriminator {
        if data[..DISCRIMINATOR_LEN] != disc {
            return None;
        }
    }
    let index = u64::from_le_bytes(data[DISCRIMINATOR_LEN..INDEX_END].try_into().ok()?);
    let commitment = FieldElement::from_be_bytes(data[INDEX_END..COMMITMENT_END].try_into().ok()?);
    if !commitment.is_canonical() {
        return None;
    }
    let enc_len = u32::from_le_bytes(data[COMMITMENT_END..ENC_LEN_END].try_into().ok()?);
    if enc_len == 0 || enc_len >= filter.max_encrypted_len {
        return None;
    }
    let end = ENC_LEN_END.checked_add(enc_len as usize)?;
    if end > data.len() {
        return None;
    }
    Some(CommitmentEntry {
        index,
        commitment,
        encrypted_output: data[ENC_LEN_END..end].to_vec(),
    })
}

pub fn parse_log_line(line: &str, filter: &EventFilter) -> Option<CommitmentEntry> {
    let b64 = line.strip_prefix(PROGRAM_DATA_PREFIX)?;
    let data = general_purpose::STANDARD.decode(b64.trim()).ok()?;
    decode_commitment_event(&data, filter)
}

/// All recognised events in one transaction's log, in log order.
pub fn extract_commitments(logs: &[String], filter: &EventFilter) -> Vec<CommitmentEntry> {
    logs.iter()
        .filter_map(|l| parse_log_line(l, filter))
        .collect()
}

#[cfg(test)]
pub(crate) fn encode_event(
    disc: [u8; 8],
    index: u64,
    commitment: [u8; 32],
    encrypted_output: &[u8],
) -> Vec<u8> {
    let mut data = Vec::with_capacity(ENC_LEN_END + encrypted_output.len());
    data.extend_from_slice(&disc);
    data.extend_from_slice(&index.to_le_bytes());
    data.extend_from_slice(&commitment);
    data.extend_from_slice(&(encrypted_output.len() as u32).to_le_bytes());
    data.extend_from_slice(encrypted_output);
    data
}

#[cfg(test)]
pub(crate) fn event_log_line(index: u64, commitment: [u8; 32], encrypted_output: &[u8]) -> String {
    let data = encode_event(
        anchor_event_discriminator("CommitmentInserted"),
        index,
        commitment,
        encrypted_output,
    );
    format!(
        "{PROGRAM_DATA_PREFIX}{}",
        general_purpose::STANDARD.encode(data)
    )
}
