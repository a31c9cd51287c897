use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, VerifyingKey};
use serde::{Deserialize, Serialize};
use serde_big_array::BigArray;
use std::fmt;

use crate::crypto::hash::Hash;
use crate::crypto::keys::{NodeKey, ValidatorId};
use crate::error::CoreError;

/// Recoverable ECDSA signature: 64 bytes of (r, s) plus one recovery byte.
/// The signer is recovered from the signed digest rather than carried
/// alongside the signature.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seal(#[serde(with = "BigArray")] pub [u8; 65]);

impl Seal {
    pub fn as_bytes(&self) -> &[u8; 65] {
        &self.0
    }

    pub fn from_slice(slice: &[u8]) -> Option<Self> {
        if slice.len() != 65 {
            return None;
        }
        let mut bytes = [0u8; 65];
        bytes.copy_from_slice(slice);
        Some(Seal(bytes))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Recover the validator identity that produced this seal over `digest`.
    pub fn recover(&self, digest: &Hash) -> Result<ValidatorId, CoreError> {
        let signature = EcdsaSignature::from_slice(&self.0[..64])
            .map_err(|_| CoreError::InvalidSignature)?;
        let recovery_id =
            RecoveryId::from_byte(self.0[64]).ok_or(CoreError::InvalidRecoveryId)?;
        let key = VerifyingKey::recover_from_prehash(digest.as_bytes(), &signature, recovery_id)
            .map_err(|_| CoreError::InvalidSignature)?;
        Ok(ValidatorId::from_verifying_key(&key))
    }
}

impl Default for Seal {
    fn default() -> Self {
        Seal([0u8; 65])
    }
}

impl fmt::Debug for Seal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Seal({}...)", &self.to_hex()[..16])
    }
}

/// Sign a 32-byte digest, producing a recoverable seal
pub fn sign_digest(key: &NodeKey, digest: &Hash) -> Result<Seal, CoreError> {
    let (signature, recovery_id) = key
        .signing_key()
        .sign_prehash_recoverable(digest.as_bytes())
        .map_err(|_| CoreError::InvalidSecretKey)?;
    let mut bytes = [0u8; 65];
    bytes[..64].copy_from_slice(&signature.to_bytes());
    bytes[64] = recovery_id.to_byte();
    Ok(Seal(bytes))
}
