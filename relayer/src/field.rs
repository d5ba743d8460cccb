//! BN254 field elements and the two-to-one hash used by the commitment tree.
//!
//! Values travel in three shapes:
//! - raw 32-byte big-endian arrays (event payloads, account data)
//! - decimal strings (the circuit/SDK representation, and what the HTTP API returns)
//! - hex strings (what some clients send to `/merkle/proof`)
//!
//! `FieldElement` is the canonical in-memory form; everything else converts through it.

use ark_bn254::Fr;
use light_poseidon::{Poseidon, PoseidonBytesHasher, PoseidonError};
use num_bigint::BigUint;
use serde::{Serialize, Serializer};
use std::fmt;
use std::sync::Mutex;
use thiserror::Error;

/// BN254 scalar field modulus, big-endian.
const MODULUS_BE: [u8; 32] = [
    0x30, 0x64, 0x4e, 0x72, 0xe1, 0x31, 0xa0, 0x29, 0xb8, 0x50, 0x45, 0xb6, 0x81, 0x81, 0x58, 0x5d,
    0x28, 0x33, 0xe8, 0x48, 0x79, 0xb9, 0x70, 0x91, 0x43, 0xe1, 0xf5, 0x93, 0xf0, 0x00, 0x00, 0x01,
];

/// A field element stored as 32 big-endian bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct FieldElement([u8; 32]);

impl FieldElement {
    pub const ZERO: FieldElement = FieldElement([0u8; 32]);

    pub fn from_be_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn to_be_bytes(&self) -> [u8; 32] {
        self.0
    }

    pub fn from_biguint(n: &BigUint) -> Option<Self> {
        let b = n.to_bytes_be();
        if b.len() > 32 {
            return None;
        }
        let mut out = [0u8; 32];
        out[32 - b.len()..].copy_from_slice(&b);
        Some(Self(out))
    }

    #[cfg(test)]
    pub fn from_u64(v: u64) -> Self {
        let mut out = [0u8; 32];
        out[24..].copy_from_slice(&v.to_be_bytes());
        Self(out)
    }

    pub fn from_decimal(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let n = BigUint::parse_bytes(s.as_bytes(), 10)?;
        Self::from_biguint(&n)
    }

    /// Accepts an optional `0x` prefix and up to 64 hex digits (left-padded).
    pub fn from_hex(s: &str) -> Option<Self> {
        let s = s.trim();
        let s = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);
        if s.is_empty() || s.len() > 64 {
            return None;
        }
        let padded = format!("{s:0>64}");
        let v = hex::decode(padded).ok()?;
        let mut out = [0u8; 32];
        out.copy_from_slice(&v);
        Some(Self(out))
    }

    /// Candidate interpretations of a client-supplied commitment reference, in lookup order.
    ///
    /// - `0x…` is hex only
    /// - exactly 64 hex digits is tried as hex first, then as decimal when it is all digits
    /// - anything else is decimal
    pub fn parse_ref(s: &str) -> Vec<FieldElement> {
        let t = s.trim();
        if t.starts_with("0x") || t.starts_with("0X") {
            return Self::from_hex(t).into_iter().collect();
        }
        let mut out = Vec::with_capacity(2);
        if t.len() == 64 {
            if let Some(v) = Self::from_hex(t) {
                out.push(v);
            }
        }
        if let Some(v) = Self::from_decimal(t) {
            if !out.contains(&v) {
                out.push(v);
            }
        }
        out
    }

    pub fn to_biguint(&self) -> BigUint {
        BigUint::from_bytes_be(&self.0)
    }

    pub fn to_decimal_string(&self) -> String {
        self.to_biguint().to_str_radix(10)
    }

    #[cfg(test)]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Strictly below the field modulus, i.e. a value Poseidon will accept.
    pub fn is_canonical(&self) -> bool {
        self.0 < MODULUS_BE
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Display for FieldElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_decimal_string())
    }
}

impl fmt::Debug for FieldElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FieldElement({})", self.to_decimal_string())
    }
}

impl Serialize for FieldElement {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_decimal_string())
    }
}

#[derive(Debug, Error)]
pub enum HashError {
    #[error("poseidon: {0}")]
    Poseidon(#[from] PoseidonError),
    #[error("poseidon hasher lock poisoned")]
    Poisoned,
}

/// Two-to-one compression function of the commitment tree.
pub trait FieldHasher: Send + Sync {
    fn hash2(&self, left: &FieldElement, right: &FieldElement) -> Result<FieldElement, HashError>;
}

/// Circom-compatible Poseidon over BN254 (width 3), matching the on-chain verifier.
pub struct PoseidonHasher {
    inner: Mutex<Poseidon<Fr>>,
}

impl PoseidonHasher {
    pub fn new() -> Result<Self, HashError> {
        Ok(Self {
            inner: Mutex::new(Poseidon::<Fr>::new_circom(2)?),
        })
    }
}

impl FieldHasher for PoseidonHasher {
    fn hash2(&self, left: &FieldElement, right: &FieldElement) -> Result<FieldElement, HashError> {
        let mut p = self.inner.lock().map_err(|_| HashError::Poisoned)?;
        let out = p.hash_bytes_be(&[&left.0, &right.0])?;
        Ok(FieldElement(out))
    }
}

#[cfg(test)]
pub mod mock {
    use super::*;

    /// Cheap, non-commutative stand-in for Poseidon: `3a + 7b + 1 (mod 2^248)`.
    pub struct LinearHasher;

    impl FieldHasher for LinearHasher {
        fn hash2(
            &self,
            left: &FieldElement,
            right: &FieldElement,
        ) -> Result<FieldElement, HashError> {
            let modulus = BigUint::from(1u8) << 248;
            let v = (left.to_biguint() * 3u8 + right.to_biguint() * 7u8 + 1u8) % modulus;
            Ok(FieldElement::from_biguint(&v).unwrap_or_default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decimal_and_hex_agree() {
        let d = FieldElement::from_decimal("255").unwrap();
        let h = FieldElement::from_hex("0xff").unwrap();
        assert_eq!(d, h);
        assert_eq!(d.to_decimal_string(), "255");
        assert_eq!(
            d.to_hex(),
            "00000000000000000000000000000000000000000000000000000000000000ff"
        );
    }

    #[test]
    fn rejects_values_wider_than_32_bytes() {
        let too_big = format!("1{}", "0".repeat(80));
        assert!(FieldElement::from_decimal(&too_big).is_none());
        assert!(FieldElement::from_hex(&"f".repeat(65)).is_none());
        assert!(FieldElement::from_decimal("12a").is_none());
    }

    #[test]
    fn parse_ref_prefers_hex_for_64_digit_strings() {
        let digits = "1".repeat(64);
        let c = FieldElement::parse_ref(&digits);
        assert_eq!(c.len(), 2);
        assert_eq!(c[0], FieldElement::from_hex(&digits).unwrap());
        assert_eq!(c[1], FieldElement::from_decimal(&digits).unwrap());

        let short = FieldElement::parse_ref("12345");
        assert_eq!(short, vec![FieldElement::from_u64(12345)]);

        let prefixed = FieldElement::parse_ref("0x10");
        assert_eq!(prefixed, vec![FieldElement::from_u64(16)]);
    }

    #[test]
    fn serializes_as_decimal_string() {
        let v = serde_json::to_value(FieldElement::from_u64(42)).unwrap();
        assert_eq!(v, serde_json::json!("42"));
    }

    #[test]
    fn poseidon_of_zero_pair_matches_circomlib() {
        let h = PoseidonHasher::new().unwrap();
        let z1 = h.hash2(&FieldElement::ZERO, &FieldElement::ZERO).unwrap();
        assert_eq!(
            z1.to_decimal_string(),
            "14744269619966411208579211824598458697587494354926760081771325075741142829156"
        );
    }

    #[test]
    fn poseidon_rejects_non_canonical_inputs() {
        let h = PoseidonHasher::new().unwrap();
        let max = FieldElement::from_be_bytes([0xff; 32]);
        assert!(!max.is_canonical());
        assert!(h.hash2(&max, &FieldElement::ZERO).is_err());
    }

    #[test]
    fn canonical_bound_is_the_bn254_modulus() {
        let modulus = FieldElement::from_be_bytes(MODULUS_BE);
        assert_eq!(
            modulus.to_decimal_string(),
            "21888242871839275222246405745257275088548364400416034343698204186575808495617"
        );
        assert!(!modulus.is_canonical());

        let below = FieldElement::from_biguint(&(modulus.to_biguint() - 1u8)).unwrap();
        assert!(below.is_canonical());
        assert!(FieldElement::ZERO.is_canonical());

        let h = PoseidonHasher::new().unwrap();
        assert!(h.hash2(&below, &FieldElement::ZERO).is_ok());
        assert!(h.hash2(&modulus, &FieldElement::ZERO).is_err());
    }
}
