use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use keystone_consensus::{
    BlockCreator, BlockImporter, BlockValidator, ConsensusError, ValidatorProvider, ValidatorSet,
};
use keystone_core::{Block, BlockHeader, GenesisConfig, Hash, Seal, SealedBlock, ValidatorId};
use tracing::info;

/// In-memory chain of sealed blocks, genesis included. Backs the round
/// engine's block creation, validation, and import seams for one node.
pub struct ChainStore {
    chain_id: u64,
    local_id: ValidatorId,
    validators: ValidatorSet,
    blocks: Mutex<Vec<SealedBlock>>,
}

impl ChainStore {
    pub fn new(genesis: &GenesisConfig, local_id: ValidatorId) -> Self {
        let validators = ValidatorSet::new(genesis.validators.clone());
        let blocks = vec![SealedBlock::new(genesis.genesis_block(), Vec::new())];
        ChainStore {
            chain_id: genesis.chain_id,
            local_id,
            validators,
            blocks: Mutex::new(blocks),
        }
    }

    pub fn local_id(&self) -> ValidatorId {
        self.local_id
    }

    /// Sequence of the latest sealed block
    pub fn height(&self) -> u64 {
        let blocks = self.blocks.lock().unwrap_or_else(|e| e.into_inner());
        blocks.len() as u64 - 1
    }

    pub fn head_hash(&self) -> Result<Hash, ConsensusError> {
        let blocks = self.blocks.lock().unwrap_or_else(|e| e.into_inner());
        let head = blocks.last().expect("genesis always present");
        Ok(head.block.hash()?)
    }

    pub fn block_at(&self, sequence: u64) -> Option<SealedBlock> {
        let blocks = self.blocks.lock().unwrap_or_else(|e| e.into_inner());
        blocks.get(sequence as usize).cloned()
    }

    fn now_secs() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

impl BlockCreator for ChainStore {
    fn create_candidate(&self, sequence: u64) -> Result<Block, ConsensusError> {
        let blocks = self.blocks.lock().unwrap_or_else(|e| e.into_inner());
        if sequence != blocks.len() as u64 {
            return Err(ConsensusError::UnknownSequence(sequence));
        }
        let parent = blocks.last().expect("genesis always present");
        let header = BlockHeader {
            chain_id: self.chain_id,
            sequence,
            parent_hash: parent.block.hash()?,
            timestamp: Self::now_secs(),
            proposer: self.local_id,
        };
        Ok(Block::new(header, Vec::new()))
    }
}

impl BlockValidator for ChainStore {
    fn validate(&self, block: &Block) -> Result<(), ConsensusError> {
        if block.header.chain_id != self.chain_id {
            return Err(ConsensusError::ValidationFailure(format!(
                "chain id {} does not match {}",
                block.header.chain_id, self.chain_id
            )));
        }
        if block.header.sequence != self.height() + 1 {
            return Err(ConsensusError::ValidationFailure(format!(
                "sequence {} does not extend height {}",
                block.header.sequence,
                self.height()
            )));
        }
        if block.header.parent_hash != self.head_hash()? {
            return Err(ConsensusError::ValidationFailure(
                "parent hash does not match the chain head".to_string(),
            ));
        }
        if !self.validators.contains(&block.header.proposer) {
            return Err(ConsensusError::ValidationFailure(
                "proposer is not a validator".to_string(),
            ));
        }
        Ok(())
    }
}

impl BlockImporter for ChainStore {
    fn import(&self, block: &Block, commit_seals: &[Seal]) -> Result<(), ConsensusError> {
        let sealed = SealedBlock::new(block.clone(), commit_seals.to_vec());
        sealed
            .verify_seals(self.validators.members(), self.validators.quorum_size())
            .map_err(|e| ConsensusError::ImportFailure(e.to_string()))?;

        let mut blocks = self.blocks.lock().unwrap_or_else(|e| e.into_inner());
        if block.header.sequence != blocks.len() as u64 {
            return Err(ConsensusError::ImportFailure(format!(
                "sequence {} does not extend height {}",
                block.header.sequence,
                blocks.len() - 1
            )));
        }
        info!(
            sequence = block.header.sequence,
            seals = commit_seals.len(),
            proposer = %block.header.proposer,
            "block imported"
        );
        blocks.push(sealed);
        Ok(())
    }
}

impl ValidatorProvider for ChainStore {
    fn validators_at(&self, _sequence: u64) -> Result<ValidatorSet, ConsensusError> {
        Ok(self.validators.clone())
    }
}
