use std::collections::BTreeMap;

use keystone_core::{Hash, Seal, ValidatorId};
use tracing::debug;

use crate::error::ConsensusError;
use crate::message::{PreparePayload, PreparedCertificate, ProposalPayload, SignedMessage};
use crate::round_id::RoundIdentifier;

/// Outcome of adding a Prepare to the round state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrepareOutcome {
    /// Counted toward quorum, not yet prepared
    Counted,
    /// Already counted for this sender; idempotent, not a protocol violation
    Duplicate,
    /// Distinct-sender count just reached quorum
    Prepared,
}

/// Outcome of adding a Commit to the round state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Counted,
    Duplicate,
    /// Distinct valid commit seals just reached quorum
    QuorumReached,
}

/// Per-round accumulator of proposal, prepare, and commit evidence.
///
/// Quorum is captured at construction against the sequence's validator set
/// and never re-fetched, so a set mutation between sequences cannot skew an
/// in-flight round. Each sender contributes at most one counted message per
/// type.
pub struct RoundState {
    round_id: RoundIdentifier,
    proposer: ValidatorId,
    quorum: usize,
    proposal: Option<SignedMessage<ProposalPayload>>,
    digest: Option<Hash>,
    prepares: BTreeMap<ValidatorId, SignedMessage<PreparePayload>>,
    commits: BTreeMap<ValidatorId, Seal>,
    prepared: bool,
    committed: bool,
}

impl RoundState {
    pub fn new(round_id: RoundIdentifier, proposer: ValidatorId, quorum: usize) -> Self {
        RoundState {
            round_id,
            proposer,
            quorum,
            proposal: None,
            digest: None,
            prepares: BTreeMap::new(),
            commits: BTreeMap::new(),
            prepared: false,
            committed: false,
        }
    }

    pub fn round_id(&self) -> RoundIdentifier {
        self.round_id
    }

    pub fn proposer(&self) -> ValidatorId {
        self.proposer
    }

    pub fn quorum(&self) -> usize {
        self.quorum
    }

    /// Accept the first valid proposal for this round. A later proposal,
    /// conflicting or not, is rejected as misbehavior evidence but must not
    /// interrupt processing.
    pub fn set_proposal(
        &mut self,
        proposal: SignedMessage<ProposalPayload>,
    ) -> Result<(), ConsensusError> {
        if self.proposal.is_some() {
            return Err(ConsensusError::DuplicateProposal(self.round_id));
        }
        let digest = proposal.payload.block.hash()?;
        self.digest = Some(digest);
        self.proposal = Some(proposal);
        Ok(())
    }

    pub fn proposal(&self) -> Option<&SignedMessage<ProposalPayload>> {
        self.proposal.as_ref()
    }

    pub fn proposed_block(&self) -> Option<&keystone_core::Block> {
        self.proposal.as_ref().map(|p| &p.payload.block)
    }

    /// Digest of the accepted proposal, if one has been accepted
    pub fn accepted_digest(&self) -> Option<Hash> {
        self.digest
    }

    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    pub fn is_committed(&self) -> bool {
        self.committed
    }

    /// Count a Prepare whose digest matches the accepted proposal. The caller
    /// is responsible for digest matching; mismatches never reach this point.
    ///
    /// The proposer's agreement is implicit in its proposal, so the prepared
    /// threshold is reached when prepare senders plus the proposer cover a
    /// quorum of distinct validators. A Prepare sent by the proposer itself
    /// is never stored: it would double-count the proposer and would make
    /// the prepared certificate unverifiable for peers.
    pub fn add_prepare(
        &mut self,
        sender: ValidatorId,
        prepare: SignedMessage<PreparePayload>,
    ) -> PrepareOutcome {
        if sender == self.proposer {
            debug!(round = %self.round_id, %sender, "prepare from the proposer ignored");
            return PrepareOutcome::Duplicate;
        }
        if self.prepares.contains_key(&sender) {
            debug!(round = %self.round_id, %sender, "duplicate prepare ignored");
            return PrepareOutcome::Duplicate;
        }
        self.prepares.insert(sender, prepare);

        let distinct = self.prepares.len() + 1;
        if !self.prepared && distinct >= self.quorum {
            self.prepared = true;
            return PrepareOutcome::Prepared;
        }
        PrepareOutcome::Counted
    }

    /// Count a Commit seal for the accepted digest
    pub fn add_commit(&mut self, sender: ValidatorId, seal: Seal) -> CommitOutcome {
        if self.commits.contains_key(&sender) {
            debug!(round = %self.round_id, %sender, "duplicate commit ignored");
            return CommitOutcome::Duplicate;
        }
        self.commits.insert(sender, seal);

        if !self.committed && self.commits.len() >= self.quorum {
            self.committed = true;
            return CommitOutcome::QuorumReached;
        }
        CommitOutcome::Counted
    }

    /// Collected commit seals, one per distinct sender
    pub fn commit_seals(&self) -> Vec<Seal> {
        self.commits.values().copied().collect()
    }

    /// Build the proof that this round reached prepared, if it did
    pub fn prepared_certificate(&self) -> Option<PreparedCertificate> {
        if !self.prepared {
            return None;
        }
        let proposal = self.proposal.as_ref()?;
        Some(PreparedCertificate {
            proposal: proposal.clone(),
            prepares: self.prepares.values().cloned().collect(),
        })
    }
}
