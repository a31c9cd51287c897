use keystone_core::ValidatorId;
use thiserror::Error;

use crate::round_id::RoundIdentifier;

#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error("Message signer {0} is not in the validator set")]
    UnknownSigner(ValidatorId),

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Stale round {0}")]
    StaleRound(RoundIdentifier),

    #[error("Stale sequence {0}")]
    StaleSequence(u64),

    #[error("Future round {0}")]
    FutureRound(RoundIdentifier),

    #[error("Future sequence {0}")]
    FutureSequence(u64),

    #[error("Digest does not match the accepted proposal")]
    MismatchedDigest,

    #[error("Proposal signed by {got}, expected proposer {expected}")]
    NotProposer {
        expected: ValidatorId,
        got: ValidatorId,
    },

    #[error("A proposal was already accepted for round {0}")]
    DuplicateProposal(RoundIdentifier),

    #[error("Insufficient quorum: have {have}, need {need}")]
    InsufficientQuorum { have: usize, need: usize },

    #[error("Invalid prepared certificate: {0}")]
    InvalidCertificate(String),

    #[error("Block validation failed: {0}")]
    ValidationFailure(String),

    #[error("Block import failed: {0}")]
    ImportFailure(String),

    #[error("No validator set known for sequence {0}")]
    UnknownSequence(u64),

    #[error("Validator set for sequence {0} is empty")]
    EmptyValidatorSet(u64),

    #[error("Message decode failed: {0}")]
    Decode(String),

    #[error("Core error: {0}")]
    Core(#[from] keystone_core::CoreError),
}
