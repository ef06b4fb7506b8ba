//! Preimage and PaymentHash for hash-locked payments.

use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use subtle::ConstantTimeEq;

use crate::error::HtlcError;

/// Length in bytes of both a preimage and its payment hash
pub const HASH_LEN: usize = 32;

/// 32-byte secret, its SHA-256 is the payment hash
#[derive(Clone, PartialEq, Eq)]
pub struct Preimage([u8; HASH_LEN]);

impl Preimage {
    /// Create a new random preimage
    pub fn random() -> Self {
        let mut bytes = [0u8; HASH_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; HASH_LEN]) -> Self {
        Self(bytes)
    }

    /// Create from a byte slice, which must be exactly 32 bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self, HtlcError> {
        let bytes: [u8; HASH_LEN] =
            bytes
                .try_into()
                .map_err(|_| HtlcError::InvalidPreimageLength {
                    expected: HASH_LEN,
                    actual: bytes.len(),
                })?;
        Ok(Self(bytes))
    }

    /// Parse a hex-encoded preimage
    pub fn from_hex(s: &str) -> Result<Self, HtlcError> {
        let bytes = hex::decode(s)
            .map_err(|e| HtlcError::InvalidInput(format!("invalid preimage hex: {e}")))?;
        Self::from_slice(&bytes)
    }

    /// Get the underlying bytes
    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Compute the payment hash (SHA256 of preimage)
    pub fn payment_hash(&self) -> PaymentHash {
        let mut hasher = Sha256::new();
        hasher.update(self.0);
        PaymentHash(hasher.finalize().into())
    }
}

impl fmt::Debug for Preimage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print the full secret
        write!(f, "Preimage({}..)", hex::encode(&self.0[..4]))
    }
}

impl Serialize for Preimage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Preimage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// SHA256 hash of preimage
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PaymentHash([u8; HASH_LEN]);

impl PaymentHash {
    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; HASH_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse a hex-encoded payment hash
    pub fn from_hex(s: &str) -> Result<Self, HtlcError> {
        let bytes = hex::decode(s)
            .map_err(|e| HtlcError::InvalidInput(format!("invalid payment hash hex: {e}")))?;
        let bytes: [u8; HASH_LEN] = bytes.try_into().map_err(|b: Vec<u8>| {
            HtlcError::InvalidInput(format!(
                "payment hash must be {HASH_LEN} bytes, got {}",
                b.len()
            ))
        })?;
        Ok(Self(bytes))
    }

    /// Get the underlying bytes
    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Verify that a preimage matches this hash.
    ///
    /// The digest comparison runs in constant time so a caller probing with
    /// guesses learns nothing from how long a mismatch takes.
    pub fn verify(&self, preimage: &Preimage) -> bool {
        preimage.payment_hash().0.ct_eq(&self.0).into()
    }
}

impl fmt::Debug for PaymentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PaymentHash({})", hex::encode(&self.0[..8]))
    }
}

impl fmt::Display for PaymentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for PaymentHash {
    type Err = HtlcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for PaymentHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for PaymentHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Derive the payment hash committed to by `preimage`
pub fn hash(preimage: &Preimage) -> PaymentHash {
    preimage.payment_hash()
}

/// Check a preimage against a payment hash
pub fn verify(preimage: &Preimage, payment_hash: &PaymentHash) -> bool {
    payment_hash.verify(preimage)
}
