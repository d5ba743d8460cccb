//! Fixed-height Poseidon Merkle tree, rebuilt wholesale from the leaf sequence.
//!
//! The accumulator never mutates in place: every indexing pass that finds new leaves produces a
//! fresh `Accumulator`, and readers hold an `Arc` to whichever snapshot was current when they
//! started.

use crate::error::{AppError, AppResult};
use crate::field::{FieldElement, FieldHasher, HashError};
use serde::Serialize;

/// `zeros[0] = 0`, `zeros[i] = H(zeros[i-1], zeros[i-1])`, for `i` in `0..=levels`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZeroValues(Vec<FieldElement>);

impl ZeroValues {
    pub fn compute(levels: usize, hasher: &dyn FieldHasher) -> Result<Self, HashError> {
        let mut zeros = Vec::with_capacity(levels + 1);
        zeros.push(FieldElement::ZERO);
        for i in 1..=levels {
            let prev = zeros[i - 1];
            zeros.push(hasher.hash2(&prev, &prev)?);
        }
        Ok(Self(zeros))
    }

    pub fn levels(&self) -> usize {
        self.0.len() - 1
    }

    pub fn at(&self, level: usize) -> FieldElement {
        self.0[level]
    }

    pub fn empty_root(&self) -> FieldElement {
        self.0[self.levels()]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MerklePath {
    pub path_elements: Vec<FieldElement>,
    pub path_indices: Vec<u8>,
    pub root: FieldElement,
}

impl MerklePath {
    /// Fold `leaf` up through the path; equals `root` for a valid proof.
    pub fn fold(&self, leaf: &FieldElement, hasher: &dyn FieldHasher) -> Result<FieldElement, HashError> {
        let mut cur = *leaf;
        for (sibling, bit) in self.path_elements.iter().zip(&self.path_indices) {
            cur = if *bit == 0 {
                hasher.hash2(&cur, sibling)?
            } else {
                hasher.hash2(sibling, &cur)?
            };
        }
        Ok(cur)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accumulator {
    levels: usize,
    /// `layers[0]` = leaves, `layers[levels]` = root (or empty).
    layers: Vec<Vec<FieldElement>>,
    zeros: ZeroValues,
}

impl Accumulator {
    /// Build every layer bottom-up. An odd trailing node pairs with `zeros[level]`.
    pub fn rebuild(
        leaves: Vec<FieldElement>,
        zeros: &ZeroValues,
        hasher: &dyn FieldHasher,
    ) -> Result<Self, HashError> {
        let levels = zeros.levels();
        let mut layers: Vec<Vec<FieldElement>> = Vec::with_capacity(levels + 1);
        layers.push(leaves);
        if layers[0].is_empty() {
            return Ok(Self {
                levels,
                layers,
                zeros: zeros.clone(),
            });
        }
        for level in 1..=levels {
            let below = &layers[level - 1];
            let mut next = Vec::with_capacity(below.len().div_ceil(2));
            for pair in below.chunks(2) {
                let right = pair.get(1).copied().unwrap_or_else(|| zeros.at(level - 1));
                next.push(hasher.hash2(&pair[0], &right)?);
            }
            layers.push(next);
        }
        Ok(Self {
            levels,
            layers,
            zeros: zeros.clone(),
        })
    }

    pub fn levels(&self) -> usize {
        self.levels
    }

    pub fn leaf_count(&self) -> usize {
        self.layers[0].len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers[0].is_empty()
    }

    pub fn layer(&self, level: usize) -> &[FieldElement] {
        self.layers.get(level).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn root(&self) -> FieldElement {
        self.layer(self.levels)
            .first()
            .copied()
            .unwrap_or_else(|| self.zeros.empty_root())
    }

    pub fn leaf(&self, index: u64) -> Option<FieldElement> {
        self.layers[0].get(usize::try_from(index).ok()?).copied()
    }

    /// Authentication path for the leaf at `index`.
    pub fn path(&self, index: u64) -> AppResult<MerklePath> {
        if self.is_empty() {
            return Err(AppError::TreeEmpty);
        }
        if self.levels < 64 && index >= (1u64 << self.levels) {
            return Err(AppError::BadRequest(format!(
                "leaf index {index} exceeds tree capacity"
            )));
        }
        let mut path_elements = Vec::with_capacity(self.levels);
        let mut path_indices = Vec::with_capacity(self.levels);
        let mut idx = index;
        for level in 0..self.levels {
            path_indices.push((idx % 2) as u8);
            let sibling = usize::try_from(idx ^ 1)
                .ok()
                .and_then(|s| self.layers[level].get(s).copied())
                .unwrap_or_else(|| self.zeros.at(level));
            path_elements.push(sibling);
            idx >>= 1;
        }
        Ok(MerklePath {
            path_elements,
            path_indices,
            root: self.root(),
        })
    }
}
