use keystone_core::{hash_blake3, serialize, sign_digest, Block, Hash, NodeKey, Seal, ValidatorId};
use serde::{Deserialize, Serialize};

use crate::error::ConsensusError;
use crate::round_id::RoundIdentifier;

/// Wire type codes for the four message kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageCode {
    Proposal = 0,
    Prepare = 1,
    Commit = 2,
    RoundChange = 3,
}

/// A payload that can be bound to a signed consensus message
pub trait Payload: Serialize + Sized {
    const CODE: MessageCode;

    fn round_id(&self) -> RoundIdentifier;

    /// Digest covered by the envelope signature: the type code is mixed in so
    /// payloads of different kinds never share a signing digest.
    fn signing_digest(&self) -> Result<Hash, ConsensusError> {
        let mut bytes = vec![Self::CODE as u8];
        bytes.extend_from_slice(&serialize::to_bytes(self)?);
        Ok(hash_blake3(&bytes))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalPayload {
    pub round_id: RoundIdentifier,
    pub block: Block,
}

impl Payload for ProposalPayload {
    const CODE: MessageCode = MessageCode::Proposal;

    fn round_id(&self) -> RoundIdentifier {
        self.round_id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreparePayload {
    pub round_id: RoundIdentifier,
    pub digest: Hash,
}

impl Payload for PreparePayload {
    const CODE: MessageCode = MessageCode::Prepare;

    fn round_id(&self) -> RoundIdentifier {
        self.round_id
    }
}

/// The commit seal signs the block digest directly, separately from the wire
/// envelope, because it becomes part of the finalized block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitPayload {
    pub round_id: RoundIdentifier,
    pub digest: Hash,
    pub commit_seal: Seal,
}

impl Payload for CommitPayload {
    const CODE: MessageCode = MessageCode::Commit;

    fn round_id(&self) -> RoundIdentifier {
        self.round_id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundChangePayload {
    /// Target round the sender wants to move to
    pub round_id: RoundIdentifier,
    pub prepared: Option<PreparedCertificate>,
}

impl Payload for RoundChangePayload {
    const CODE: MessageCode = MessageCode::RoundChange;

    fn round_id(&self) -> RoundIdentifier {
        self.round_id
    }
}

/// Proof that "prepared" was reached in an earlier round: the accepted
/// proposal plus at least quorum - 1 matching Prepare messages. Carried in
/// round-change messages to preserve safety across rounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreparedCertificate {
    pub proposal: SignedMessage<ProposalPayload>,
    pub prepares: Vec<SignedMessage<PreparePayload>>,
}

impl PreparedCertificate {
    /// Round in which the certificate was formed
    pub fn round_id(&self) -> RoundIdentifier {
        self.proposal.payload.round_id
    }

    pub fn block(&self) -> &Block {
        &self.proposal.payload.block
    }

    pub fn digest(&self) -> Result<Hash, ConsensusError> {
        Ok(self.proposal.payload.block.hash()?)
    }
}

/// Signed payload envelope. The author is never carried on the wire: it is
/// recovered from the signature over the payload's signing digest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedMessage<P> {
    pub payload: P,
    pub signature: Seal,
}

impl<P: Payload> SignedMessage<P> {
    /// Recover the validator identity that signed this message
    pub fn author(&self) -> Result<ValidatorId, ConsensusError> {
        let digest = self.payload.signing_digest()?;
        self.signature
            .recover(&digest)
            .map_err(|_| ConsensusError::InvalidSignature)
    }
}

/// The four consensus message kinds under one wire envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConsensusMessage {
    Proposal(SignedMessage<ProposalPayload>),
    Prepare(SignedMessage<PreparePayload>),
    Commit(SignedMessage<CommitPayload>),
    RoundChange(SignedMessage<RoundChangePayload>),
}

impl ConsensusMessage {
    pub fn code(&self) -> MessageCode {
        match self {
            ConsensusMessage::Proposal(_) => MessageCode::Proposal,
            ConsensusMessage::Prepare(_) => MessageCode::Prepare,
            ConsensusMessage::Commit(_) => MessageCode::Commit,
            ConsensusMessage::RoundChange(_) => MessageCode::RoundChange,
        }
    }

    pub fn round_id(&self) -> RoundIdentifier {
        match self {
            ConsensusMessage::Proposal(m) => m.payload.round_id,
            ConsensusMessage::Prepare(m) => m.payload.round_id,
            ConsensusMessage::Commit(m) => m.payload.round_id,
            ConsensusMessage::RoundChange(m) => m.payload.round_id,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, ConsensusError> {
        Ok(serialize::to_bytes(self)?)
    }

    /// Decode a wire message. Malformed input is reported as a `Decode` error
    /// and must be discarded by the caller, never propagated past the
    /// message-handling boundary.
    pub fn decode(bytes: &[u8]) -> Result<Self, ConsensusError> {
        serialize::from_bytes(bytes).map_err(|e| ConsensusError::Decode(e.to_string()))
    }
}

/// Builds signed consensus messages with the local validator's key
pub struct MessageFactory {
    key: NodeKey,
}

impl MessageFactory {
    pub fn new(key: NodeKey) -> Self {
        MessageFactory { key }
    }

    pub fn local_id(&self) -> ValidatorId {
        self.key.validator_id()
    }

    fn sign<P: Payload>(&self, payload: P) -> Result<SignedMessage<P>, ConsensusError> {
        let digest = payload.signing_digest()?;
        let signature = sign_digest(&self.key, &digest)?;
        Ok(SignedMessage { payload, signature })
    }

    pub fn create_proposal(
        &self,
        round_id: RoundIdentifier,
        block: Block,
    ) -> Result<SignedMessage<ProposalPayload>, ConsensusError> {
        self.sign(ProposalPayload { round_id, block })
    }

    pub fn create_prepare(
        &self,
        round_id: RoundIdentifier,
        digest: Hash,
    ) -> Result<SignedMessage<PreparePayload>, ConsensusError> {
        self.sign(PreparePayload { round_id, digest })
    }

    pub fn create_commit(
        &self,
        round_id: RoundIdentifier,
        digest: Hash,
    ) -> Result<SignedMessage<CommitPayload>, ConsensusError> {
        let commit_seal = sign_digest(&self.key, &digest)?;
        self.sign(CommitPayload {
            round_id,
            digest,
            commit_seal,
        })
    }

    pub fn create_round_change(
        &self,
        round_id: RoundIdentifier,
        prepared: Option<PreparedCertificate>,
    ) -> Result<SignedMessage<RoundChangePayload>, ConsensusError> {
        self.sign(RoundChangePayload { round_id, prepared })
    }
}
