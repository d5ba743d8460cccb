//! Decoder for the on-chain `MerkleTreeAccount` (zero-copy Anchor account).
//!
//! Layout for height `H` and root history size `R`:
//!
//! ```text
//! 8        discriminator
//! 32       authority
//! 8        next_index            u64 LE
//! H * 32   subtrees              (filled-subtree cache, unused here)
//! 32       root
//! R * 32   root_history
//! 8        root_index            u64 LE
//! 8        max_deposit_amount    u64 LE
//! 1        height
//! 1        root_history_size
//! 1        bump
//! 5        padding
//! ```

use crate::error::{AppError, AppResult};
use crate::field::FieldElement;
use solana_sdk::pubkey::Pubkey;

/// Authoritative counters read straight from the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnChainTreeState {
    pub authority: Pubkey,
    pub next_index: u64,
    pub root: FieldElement,
    pub root_history: Vec<FieldElement>,
    pub root_index: u64,
    pub max_deposit_amount: u64,
    pub height: u8,
    pub root_history_size: u8,
    pub bump: u8,
}

impl OnChainTreeState {
    /// Whether `root` is the current root or still in the history ring buffer.
    pub fn is_known_root(&self, root: &FieldElement) -> bool {
        if root.is_zero() {
            return false;
        }
        self.root == *root || self.root_history.iter().any(|r| r == root)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TreeAccountLayout {
    pub levels: usize,
    pub root_history_size: usize,
}

impl TreeAccountLayout {
    pub fn new(levels: usize, root_history_size: usize) -> Self {
        Self {
            levels,
            root_history_size,
        }
    }

    fn next_index_offset(&self) -> usize {
        8 + 32
    }

    fn root_offset(&self) -> usize {
        self.next_index_offset() + 8 + self.levels * 32
    }

    fn root_history_offset(&self) -> usize {
        self.root_offset() + 32
    }

    fn root_index_offset(&self) -> usize {
        self.root_history_offset() + self.root_history_size * 32
    }

    /// Bytes needed up to and including `bump` (padding is not required).
    pub fn min_len(&self) -> usize {
        self.root_index_offset() + 8 + 8 + 3
    }

    pub fn decode(&self, data: &[u8]) -> AppResult<OnChainTreeState> {
        if data.len() < self.min_len() {
            return Err(AppError::BadGateway(format!(
                "tree account too small (len={} need={})",
                data.len(),
                self.min_len()
            )));
        }
        let mut r = Reader::new(data, 8);
        let authority = Pubkey::new_from_array(r.array32());
        let next_index = r.u64_le();
        r.skip(self.levels * 32);
        let root = FieldElement::from_be_bytes(r.array32());
        let root_history = (0..self.root_history_size)
            .map(|_| FieldElement::from_be_bytes(r.array32()))
            .collect();
        let root_index = r.u64_le();
        let max_deposit_amount = r.u64_le();
        let height = r.u8();
        let root_history_size = r.u8();
        let bump = r.u8();

        if height as usize != self.levels || root_history_size as usize != self.root_history_size {
            tracing::warn!(
                onchain_height = height,
                onchain_root_history_size = root_history_size,
                expected_height = self.levels,
                expected_root_history_size = self.root_history_size,
                "tree account geometry differs from configuration"
            );
        }

        Ok(OnChainTreeState {
            authority,
            next_index,
            root,
            root_history,
            root_index,
            max_deposit_amount,
            height,
            root_history_size,
            bump,
        })
    }
}

/// Forward-only cursor; callers check the total length up front.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8], pos: usize) -> Self {
        Self { data, pos }
    }

    fn skip(&mut self, n: usize) {
        self.pos += n;
    }

    fn array32(&mut self) -> [u8; 32] {
        let mut out = [0u8; 32];
        out.copy_from_slice(&self.data[self.pos..self.pos + 32]);
        self.pos += 32;
        out
    }

    fn u64_le(&mut self) -> u64 {
        let mut b = [0u8; 8];
        b.copy_from_slice(&self.data[self.pos..self.pos + 8]);
        self.pos += 8;
        u64::from_le_bytes(b)
    }

    fn u8(&mut self) -> u8 {
        let v = self.data[self.pos];
        self.pos += 1;
        v
    }
}

#[cfg(test)]
pub(crate) fn encode_tree_account(
    layout: &TreeAccountLayout,
    next_index: u64,
    root: [u8; 32],
    history: &[[u8; 32]],
    max_deposit_amount: u64,
) -> Vec<u8> {
    let mut d = Vec::new();
    d.extend_from_slice(&[0xA1; 8]);
    d.extend_from_slice(&[0x11; 32]);
    d.extend_from_slice(&next_index.to_le_bytes());
    d.extend_from_slice(&vec![0xCC; layout.levels * 32]);
    d.extend_from_slice(&root);
    for i in 0..layout.root_history_size {
        d.extend_from_slice(history.get(i).unwrap_or(&[0u8; 32]));
    }
    d.extend_from_slice(&7u64.to_le_bytes());
    d.extend_from_slice(&max_deposit_amount.to_le_bytes());
    d.push(layout.levels as u8);
    d.push(layout.root_history_size as u8);
    d.push(254);
    d.extend_from_slice(&[0u8; 5]);
    d
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_match_deployed_geometry() {
        let l = TreeAccountLayout::new(26, 100);
        assert_eq!(l.root_offset(), 880);
        assert_eq!(l.root_index_offset(), 4112);
        assert_eq!(l.min_len(), 4131);
    }

    #[test]
    fn decodes_counters_and_roots() {
        let l = TreeAccountLayout::new(26, 100);
        let mut root = [0u8; 32];
        root[31] = 5;
        let mut old = [0u8; 32];
        old[31] = 4;
        let data = encode_tree_account(&l, 42, root, &[old], 1_000_000_000);
        assert_eq!(data.len(), 4136);

        let s = l.decode(&data).unwrap();
        assert_eq!(s.authority, Pubkey::new_from_array([0x11; 32]));
        assert_eq!(s.next_index, 42);
        assert_eq!(s.root, FieldElement::from_u64(5));
        assert_eq!(s.root_history.len(), 100);
        assert_eq!(s.root_history[0], FieldElement::from_u64(4));
        assert_eq!(s.root_index, 7);
        assert_eq!(s.max_deposit_amount, 1_000_000_000);
        assert_eq!((s.height, s.root_history_size, s.bump), (26, 100, 254));

        assert!(s.is_known_root(&FieldElement::from_u64(5)));
        assert!(s.is_known_root(&FieldElement::from_u64(4)));
        assert!(!s.is_known_root(&FieldElement::from_u64(3)));
        assert!(!s.is_known_root(&FieldElement::ZERO));
    }

    #[test]
    fn short_buffer_is_an_error_not_a_panic() {
        let l = TreeAccountLayout::new(4, 2);
        let data = encode_tree_account(&l, 1, [0u8; 32], &[], 1);
        assert!(l.decode(&data[..l.min_len() - 1]).is_err());
        assert!(l.decode(&data[..l.min_len()]).is_ok());
    }
}
