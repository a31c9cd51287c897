use serde::{Deserialize, Serialize};

use crate::crypto::{hash_blake3, Hash, Seal, ValidatorId};
use crate::error::CoreError;
use crate::serialize;

/// Block header containing metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Chain identifier
    pub chain_id: u64,
    /// Chain height (0 for genesis)
    pub sequence: u64,
    /// Hash of the previous block (zeros for genesis)
    pub parent_hash: Hash,
    /// Unix timestamp
    pub timestamp: u64,
    /// Validator that proposed this block
    pub proposer: ValidatorId,
}

/// A block candidate as agreed by consensus.
///
/// The body is opaque to the round engine; transaction selection and state
/// transition live behind the block creation/validation collaborators. Commit
/// seals are not part of the block: they are collected during consensus and
/// attached at import time, so the digest signed by validators is stable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub body: Vec<u8>,
}

impl Block {
    pub fn new(header: BlockHeader, body: Vec<u8>) -> Self {
        Block { header, body }
    }

    /// Compute the block digest signed by Prepare/Commit messages
    pub fn hash(&self) -> Result<Hash, CoreError> {
        let bytes = serialize::to_bytes(self)?;
        Ok(hash_blake3(&bytes))
    }
}

/// A block finalized by consensus, carrying its quorum of commit seals
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SealedBlock {
    pub block: Block,
    pub commit_seals: Vec<Seal>,
}

impl SealedBlock {
    pub fn new(block: Block, commit_seals: Vec<Seal>) -> Self {
        SealedBlock {
            block,
            commit_seals,
        }
    }

    /// Verify that at least `quorum` distinct seals recover to members of
    /// `validators` over the block digest.
    pub fn verify_seals(
        &self,
        validators: &[ValidatorId],
        quorum: usize,
    ) -> Result<(), CoreError> {
        let digest = self.block.hash()?;
        let mut sealers = std::collections::HashSet::new();
        for seal in &self.commit_seals {
            let signer = seal.recover(&digest)?;
            if !validators.contains(&signer) {
                return Err(CoreError::InvalidSignature);
            }
            sealers.insert(signer);
        }
        if sealers.len() < quorum {
            return Err(CoreError::InvalidSignature);
        }
        Ok(())
    }
}

/// Genesis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenesisConfig {
    pub chain_id: u64,
    pub timestamp: u64,
    pub validators: Vec<ValidatorId>,
}

impl GenesisConfig {
    /// Create the genesis block from this config
    pub fn genesis_block(&self) -> Block {
        let header = BlockHeader {
            chain_id: self.chain_id,
            sequence: 0,
            parent_hash: Hash::ZERO,
            timestamp: self.timestamp,
            proposer: ValidatorId::default(),
        };
        Block::new(header, Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{sign_digest, NodeKey};

    fn test_block(sequence: u64, proposer: ValidatorId) -> Block {
        let header = BlockHeader {
            chain_id: 1,
            sequence,
            parent_hash: Hash::ZERO,
            timestamp: 1000,
            proposer,
        };
        Block::new(header, b"body".to_vec())
    }

    #[test]
    fn test_block_hash_deterministic() {
        let block = test_block(1, ValidatorId::default());
        assert_eq!(block.hash().unwrap(), block.hash().unwrap());
    }

    #[test]
    fn test_block_hash_depends_on_body() {
        let a = test_block(1, ValidatorId::default());
        let mut b = a.clone();
        b.body = b"other".to_vec();
        assert_ne!(a.hash().unwrap(), b.hash().unwrap());
    }

    #[test]
    fn test_sealed_block_verify() {
        let keys: Vec<NodeKey> = (0..4).map(|_| NodeKey::generate()).collect();
        let validators: Vec<ValidatorId> = keys.iter().map(|k| k.validator_id()).collect();

        let block = test_block(1, validators[0]);
        let digest = block.hash().unwrap();
        let seals: Vec<Seal> = keys[..3]
            .iter()
            .map(|k| sign_digest(k, &digest).unwrap())
            .collect();

        let sealed = SealedBlock::new(block, seals);
        assert!(sealed.verify_seals(&validators, 3).is_ok());
        assert!(sealed.verify_seals(&validators, 4).is_err());
    }

    #[test]
    fn test_sealed_block_rejects_outsider_seal() {
        let keys: Vec<NodeKey> = (0..4).map(|_| NodeKey::generate()).collect();
        let validators: Vec<ValidatorId> = keys.iter().map(|k| k.validator_id()).collect();

        let block = test_block(1, validators[0]);
        let digest = block.hash().unwrap();
        let outsider = NodeKey::generate();
        let seals = vec![sign_digest(&outsider, &digest).unwrap()];

        let sealed = SealedBlock::new(block, seals);
        assert!(sealed.verify_seals(&validators, 1).is_err());
    }

    #[test]
    fn test_genesis_block() {
        let config = GenesisConfig {
            chain_id: 7,
            timestamp: 0,
            validators: vec![ValidatorId::default()],
        };
        let genesis = config.genesis_block();
        assert_eq!(genesis.header.sequence, 0);
        assert_eq!(genesis.header.parent_hash, Hash::ZERO);
        assert!(genesis.body.is_empty());
    }
}
