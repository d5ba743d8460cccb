//! In-memory mirror of every leaf the scanner has seen.
//!
//! Three views over one entry list:
//! - ciphertext (hex) -> entry   (idempotency key, `/utxos/*`)
//! - commitment       -> entry   (`/merkle/proof`)
//! - leaf index       -> entry   (ordered, gap tolerant; feeds the accumulator)

use crate::event::CommitmentEntry;
use crate::field::FieldElement;
use std::collections::{BTreeMap, HashMap};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Inserted,
    /// Same ciphertext already indexed (overlapping scans).
    Duplicate,
    /// Index already taken by a different ciphertext.
    IndexConflict,
}

#[derive(Debug, Default)]
pub struct CommitmentIndex {
    entries: Vec<CommitmentEntry>,
    by_output: HashMap<String, usize>,
    by_commitment: HashMap<FieldElement, usize>,
    by_index: BTreeMap<u64, usize>,
}

impl CommitmentIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn record(&mut self, entry: CommitmentEntry) -> RecordOutcome {
        let key = entry.encrypted_output_hex();
        if self.by_output.contains_key(&key) {
            return RecordOutcome::Duplicate;
        }
        if let Some(&existing) = self.by_index.get(&entry.index) {
            warn!(
                index = entry.index,
                existing = %self.entries[existing].commitment,
                incoming = %entry.commitment,
                "leaf index already indexed with a different ciphertext; skipping"
            );
            return RecordOutcome::IndexConflict;
        }
        let pos = self.entries.len();
        self.by_output.insert(key, pos);
        self.by_commitment.insert(entry.commitment, pos);
        self.by_index.insert(entry.index, pos);
        self.entries.push(entry);
        RecordOutcome::Inserted
    }

    pub fn contains_output(&self, encrypted_output_hex: &str) -> bool {
        self.by_output.contains_key(encrypted_output_hex)
    }

    pub fn get_by_output(&self, encrypted_output_hex: &str) -> Option<&CommitmentEntry> {
        self.by_output
            .get(encrypted_output_hex)
            .map(|&i| &self.entries[i])
    }

    pub fn get_by_commitment(&self, commitment: &FieldElement) -> Option<&CommitmentEntry> {
        self.by_commitment.get(commitment).map(|&i| &self.entries[i])
    }

    /// Lookup by a client-supplied reference (decimal or hex).
    pub fn find_commitment(&self, commitment_ref: &str) -> Option<&CommitmentEntry> {
        FieldElement::parse_ref(commitment_ref)
            .iter()
            .find_map(|c| self.get_by_commitment(c))
    }

    #[cfg(test)]
    pub fn get_by_index(&self, index: u64) -> Option<&CommitmentEntry> {
        self.by_index.get(&index).map(|&i| &self.entries[i])
    }

    /// One past the highest known leaf index.
    pub fn dense_len(&self) -> u64 {
        self.by_index
            .keys()
            .next_back()
            .map(|&max| max + 1)
            .unwrap_or(0)
    }

    /// Ciphertexts with `start <= index < end`, ordered by index; gaps are omitted.
    pub fn outputs_in_range(&self, start: u64, end: u64) -> Vec<String> {
        if start >= end {
            return Vec::new();
        }
        self.by_index
            .range(start..end)
            .map(|(_, &i)| self.entries[i].encrypted_output_hex())
            .collect()
    }

    /// Leaf sequence `0..dense_len()`, with unknown slots as zero.
    pub fn leaf_sequence(&self) -> Vec<FieldElement> {
        let mut leaves = vec![FieldElement::ZERO; self.dense_len() as usize];
        for (&index, &i) in &self.by_index {
            leaves[index as usize] = self.entries[i].commitment;
        }
        leaves
    }
}
