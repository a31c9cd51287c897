//! Collaborator seams around the round engine. Transport, block execution,
//! and chain storage live behind these traits; the engine never assumes more
//! than best-effort delivery and bounded collaborator calls.

use std::time::Duration;

use keystone_core::{Block, Seal};

use crate::error::ConsensusError;
use crate::message::ConsensusMessage;
use crate::round_id::RoundIdentifier;

/// Outbound message delivery. Best-effort broadcast with no ordering or
/// delivery guarantees.
pub trait Transport: Send + Sync {
    fn broadcast(&self, message: &ConsensusMessage);
}

/// Builds a block candidate for the local proposer
pub trait BlockCreator: Send + Sync {
    fn create_candidate(&self, sequence: u64) -> Result<Block, ConsensusError>;
}

/// Validates a proposed block against the chain state
pub trait BlockValidator: Send + Sync {
    fn validate(&self, block: &Block) -> Result<(), ConsensusError>;
}

/// Imports a committed block with its quorum of commit seals.
/// Consumed exactly once per committed sequence.
pub trait BlockImporter: Send + Sync {
    fn import(&self, block: &Block, commit_seals: &[Seal]) -> Result<(), ConsensusError>;
}

/// Round-change timer. Starting a timer for a round supersedes any earlier
/// one; a cancelled timer must not fire.
pub trait RoundTimer: Send + Sync {
    fn start(&self, round: RoundIdentifier, timeout: Duration);
    fn cancel(&self);
}

/// Events drained by the single per-sequence consumer loop
#[derive(Debug, Clone)]
pub enum ConsensusEvent {
    /// An inbound wire message
    Message(ConsensusMessage),
    /// A round-change timer fired for the given round
    RoundExpired(RoundIdentifier),
}
