use std::sync::Arc;

use keystone_core::ValidatorId;
use tracing::{debug, info, warn};

use crate::error::ConsensusError;
use crate::message::{
    CommitPayload, ConsensusMessage, MessageFactory, PreparePayload, PreparedCertificate,
    ProposalPayload, SignedMessage,
};
use crate::round_id::RoundIdentifier;
use crate::round_state::{CommitOutcome, PrepareOutcome, RoundState};
use crate::traits::{BlockCreator, BlockImporter, BlockValidator, Transport};
use crate::validators::ValidatorSet;

/// Lifecycle of one round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundPhase {
    /// Waiting for the proposer's block
    AwaitingProposal,
    /// Proposal accepted, own Prepare broadcast (non-proposer) or Proposal
    /// broadcast (proposer)
    Preparing,
    /// Prepare quorum reached, own Commit broadcast
    Prepared,
    /// Terminal: commit quorum reached and block imported
    Committed,
    /// Terminal: superseded by round change
    Abandoned,
}

/// The per-round state machine. Drives proposal, prepare, commit, and quorum
/// detection for a single round; message validity is established upstream by
/// the `MessageValidator` before anything reaches this type.
pub struct RoundManager {
    round_id: RoundIdentifier,
    phase: RoundPhase,
    state: RoundState,
    local_id: ValidatorId,
    factory: Arc<MessageFactory>,
    transport: Arc<dyn Transport>,
    creator: Arc<dyn BlockCreator>,
    block_validator: Arc<dyn BlockValidator>,
    importer: Arc<dyn BlockImporter>,
    /// Digest mandated by a prepared certificate carried into this round
    required_digest: Option<keystone_core::Hash>,
}

impl RoundManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        round_id: RoundIdentifier,
        validators: &ValidatorSet,
        factory: Arc<MessageFactory>,
        transport: Arc<dyn Transport>,
        creator: Arc<dyn BlockCreator>,
        block_validator: Arc<dyn BlockValidator>,
        importer: Arc<dyn BlockImporter>,
    ) -> Self {
        let proposer = validators.proposer_for(round_id.sequence, round_id.round);
        let state = RoundState::new(round_id, proposer, validators.quorum_size());
        RoundManager {
            round_id,
            phase: RoundPhase::AwaitingProposal,
            state,
            local_id: factory.local_id(),
            factory,
            transport,
            creator,
            block_validator,
            importer,
            required_digest: None,
        }
    }

    pub fn round_id(&self) -> RoundIdentifier {
        self.round_id
    }

    pub fn phase(&self) -> RoundPhase {
        self.phase
    }

    pub fn is_local_proposer(&self) -> bool {
        self.state.proposer() == self.local_id
    }

    pub fn has_proposal(&self) -> bool {
        self.state.proposal().is_some()
    }

    pub fn accepted_digest(&self) -> Option<keystone_core::Hash> {
        self.state.accepted_digest()
    }

    pub fn prepared_certificate(&self) -> Option<PreparedCertificate> {
        self.state.prepared_certificate()
    }

    /// Enter the round. The proposer creates and broadcasts a block
    /// candidate, or re-proposes the block of a prepared certificate carried
    /// through round change; everyone else waits for the proposal.
    pub fn start(&mut self, inherited: Option<PreparedCertificate>) -> Result<(), ConsensusError> {
        if let Some(certificate) = &inherited {
            self.required_digest = Some(certificate.digest()?);
        }
        if !self.is_local_proposer() {
            return Ok(());
        }

        let block = match inherited {
            // Safety rule: a value a quorum once prepared is re-proposed
            // verbatim, never replaced by a fresh candidate.
            Some(certificate) => {
                info!(
                    round = %self.round_id,
                    cert_round = %certificate.round_id(),
                    "re-proposing prepared block"
                );
                certificate.block().clone()
            }
            None => self.creator.create_candidate(self.round_id.sequence)?,
        };

        let proposal = self.factory.create_proposal(self.round_id, block)?;
        self.state.set_proposal(proposal.clone())?;
        self.transport
            .broadcast(&ConsensusMessage::Proposal(proposal));
        self.phase = RoundPhase::Preparing;
        debug!(round = %self.round_id, "proposal broadcast");
        Ok(())
    }

    /// Accept the proposer's block: validate it, record it, and answer with
    /// our own Prepare. The proposal has already passed authorship checks.
    pub fn handle_proposal(
        &mut self,
        proposal: SignedMessage<ProposalPayload>,
    ) -> Result<(), ConsensusError> {
        if self.phase != RoundPhase::AwaitingProposal {
            return Err(ConsensusError::DuplicateProposal(self.round_id));
        }
        if let Some(required) = self.required_digest {
            if proposal.payload.block.hash()? != required {
                warn!(
                    round = %self.round_id,
                    "proposal deviates from the prepared certificate"
                );
                return Err(ConsensusError::MismatchedDigest);
            }
        }

        self.block_validator.validate(&proposal.payload.block)?;

        self.state.set_proposal(proposal)?;
        self.phase = RoundPhase::Preparing;

        let digest = match self.state.accepted_digest() {
            Some(digest) => digest,
            None => return Ok(()),
        };
        let prepare = self.factory.create_prepare(self.round_id, digest)?;
        self.transport
            .broadcast(&ConsensusMessage::Prepare(prepare.clone()));
        // Our own prepare counts toward quorum like any other
        self.record_prepare(self.local_id, prepare)?;
        Ok(())
    }

    /// Count a prepare for the accepted digest. Returns `MismatchedDigest`
    /// for prepares referencing any other digest; those never count and never
    /// trigger a Commit.
    pub fn handle_prepare(
        &mut self,
        sender: ValidatorId,
        prepare: SignedMessage<PreparePayload>,
    ) -> Result<(), ConsensusError> {
        match self.state.accepted_digest() {
            Some(digest) if digest == prepare.payload.digest => {
                self.record_prepare(sender, prepare)
            }
            Some(_) => Err(ConsensusError::MismatchedDigest),
            None => Err(ConsensusError::MismatchedDigest),
        }
    }

    fn record_prepare(
        &mut self,
        sender: ValidatorId,
        prepare: SignedMessage<PreparePayload>,
    ) -> Result<(), ConsensusError> {
        match self.state.add_prepare(sender, prepare) {
            PrepareOutcome::Prepared => self.on_prepared(),
            PrepareOutcome::Counted | PrepareOutcome::Duplicate => Ok(()),
        }
    }

    /// Prepare quorum reached: broadcast our commit and count it locally
    fn on_prepared(&mut self) -> Result<(), ConsensusError> {
        info!(round = %self.round_id, "round prepared");
        self.phase = RoundPhase::Prepared;

        let digest = match self.state.accepted_digest() {
            Some(digest) => digest,
            None => return Ok(()),
        };
        let commit = self.factory.create_commit(self.round_id, digest)?;
        self.transport
            .broadcast(&ConsensusMessage::Commit(commit.clone()));
        self.record_commit(self.local_id, &commit.payload)?;
        Ok(())
    }

    /// Count a commit seal. Returns `Ok(true)` exactly once, when the commit
    /// quorum is reached and the block has been imported.
    pub fn handle_commit(
        &mut self,
        sender: ValidatorId,
        commit: SignedMessage<CommitPayload>,
    ) -> Result<bool, ConsensusError> {
        match self.state.accepted_digest() {
            Some(digest) if digest == commit.payload.digest => {
                let before = self.phase;
                self.record_commit(sender, &commit.payload)?;
                Ok(before != RoundPhase::Committed && self.phase == RoundPhase::Committed)
            }
            Some(_) => Err(ConsensusError::MismatchedDigest),
            None => Err(ConsensusError::MismatchedDigest),
        }
    }

    fn record_commit(
        &mut self,
        sender: ValidatorId,
        commit: &CommitPayload,
    ) -> Result<(), ConsensusError> {
        match self.state.add_commit(sender, commit.commit_seal) {
            CommitOutcome::QuorumReached => self.import_block(),
            CommitOutcome::Counted | CommitOutcome::Duplicate => Ok(()),
        }
    }

    /// Hand the block and its seal quorum to the import collaborator.
    /// Import failure is transient: the caller reacts with a round change,
    /// never by crashing the driver.
    fn import_block(&mut self) -> Result<(), ConsensusError> {
        let block = match self.state.proposed_block() {
            Some(block) => block.clone(),
            None => return Ok(()),
        };
        let seals = self.state.commit_seals();
        info!(
            round = %self.round_id,
            seals = seals.len(),
            "commit quorum reached, importing block"
        );
        self.importer.import(&block, &seals)?;
        self.phase = RoundPhase::Committed;
        Ok(())
    }

    /// The round-change timeout fired or the round was otherwise given up:
    /// stop participating and surrender the prepared certificate if this
    /// round formed one. The caller folds it into the retained lock that
    /// rides on every subsequent round-change message.
    pub fn abandon(&mut self) -> Option<PreparedCertificate> {
        self.phase = RoundPhase::Abandoned;
        let certificate = self.state.prepared_certificate();
        debug!(
            round = %self.round_id,
            prepared = certificate.is_some(),
            "abandoning round"
        );
        certificate
    }
}
