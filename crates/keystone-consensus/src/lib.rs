//! Keystone Consensus - IBFT round engine
//!
//! This crate drives one consensus instance per block height: proposal,
//! prepare/commit quorum tracking, round changes with prepared-certificate
//! carry-over, and the message validation boundary in front of it all.

pub mod controller;
pub mod error;
pub mod message;
pub mod round;
pub mod round_change;
pub mod round_id;
pub mod round_state;
pub mod timer;
pub mod traits;
pub mod validation;
pub mod validators;

pub use controller::{ConsensusConfig, Controller};
pub use error::ConsensusError;
pub use message::{
    CommitPayload, ConsensusMessage, MessageCode, MessageFactory, Payload, PreparePayload,
    PreparedCertificate, ProposalPayload, RoundChangePayload, SignedMessage,
};
pub use round::{RoundManager, RoundPhase};
pub use round_change::{RoundChangeManager, RoundChangeOutcome};
pub use round_id::RoundIdentifier;
pub use round_state::{CommitOutcome, PrepareOutcome, RoundState};
pub use timer::{NullRoundTimer, TokioRoundTimer};
pub use traits::{
    BlockCreator, BlockImporter, BlockValidator, ConsensusEvent, RoundTimer, Transport,
};
pub use validation::MessageValidator;
pub use validators::{StaticValidatorProvider, ValidatorProvider, ValidatorSet};
