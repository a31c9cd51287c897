use k256::ecdsa::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::crypto::hash::hash_blake3;
use crate::error::CoreError;

/// Validator identity: the trailing 20 bytes of the Blake3 hash of the
/// compressed secp256k1 public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct ValidatorId(pub [u8; 20]);

impl ValidatorId {
    pub fn from_verifying_key(key: &VerifyingKey) -> Self {
        let encoded = key.to_encoded_point(true);
        let digest = hash_blake3(encoded.as_bytes());
        let mut id = [0u8; 20];
        id.copy_from_slice(&digest.as_bytes()[12..32]);
        ValidatorId(id)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn from_slice(slice: &[u8]) -> Option<Self> {
        if slice.len() != 20 {
            return None;
        }
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(slice);
        Some(ValidatorId(bytes))
    }

    pub fn from_hex(s: &str) -> Result<Self, CoreError> {
        let bytes = hex::decode(s)?;
        Self::from_slice(&bytes).ok_or(CoreError::InvalidValidatorId)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for ValidatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ValidatorId({})", self.to_hex())
    }
}

impl fmt::Display for ValidatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Node signing key (secp256k1)
/// Not serializable to prevent accidental exposure
#[derive(Clone)]
pub struct NodeKey(SigningKey);

impl NodeKey {
    /// Generate a new random key
    pub fn generate() -> Self {
        NodeKey(SigningKey::random(&mut OsRng))
    }

    /// Create from a 32-byte scalar
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, CoreError> {
        SigningKey::from_slice(bytes)
            .map(NodeKey)
            .map_err(|_| CoreError::InvalidSecretKey)
    }

    /// Create from hex string
    pub fn from_hex(s: &str) -> Result<Self, CoreError> {
        let bytes = hex::decode(s)?;
        if bytes.len() != 32 {
            return Err(CoreError::InvalidSecretKey);
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Self::from_bytes(&arr)
    }

    /// The validator identity this key signs as
    pub fn validator_id(&self) -> ValidatorId {
        ValidatorId::from_verifying_key(self.0.verifying_key())
    }

    pub(crate) fn signing_key(&self) -> &SigningKey {
        &self.0
    }

    /// Export raw bytes (use with caution)
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes().into()
    }

    /// Export as hex string (use with caution)
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }
}

impl fmt::Debug for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeKey([REDACTED])")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_generation() {
        let key = NodeKey::generate();
        assert_ne!(key.validator_id().0, [0u8; 20]);
    }

    #[test]
    fn test_key_deterministic() {
        let bytes = [42u8; 32];
        let k1 = NodeKey::from_bytes(&bytes).unwrap();
        let k2 = NodeKey::from_bytes(&bytes).unwrap();
        assert_eq!(k1.validator_id(), k2.validator_id());
    }

    #[test]
    fn test_key_hex_roundtrip() {
        let key = NodeKey::generate();
        let recovered = NodeKey::from_hex(&key.to_hex()).unwrap();
        assert_eq!(key.validator_id(), recovered.validator_id());
    }

    #[test]
    fn test_zero_secret_rejected() {
        assert!(NodeKey::from_bytes(&[0u8; 32]).is_err());
    }

    #[test]
    fn test_validator_id_hex_roundtrip() {
        let id = NodeKey::generate().validator_id();
        let recovered = ValidatorId::from_hex(&id.to_hex()).unwrap();
        assert_eq!(id, recovered);
    }
}
