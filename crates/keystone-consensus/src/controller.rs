use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use keystone_core::ValidatorId;
use tracing::{debug, info, warn};

use crate::error::ConsensusError;
use crate::message::{
    CommitPayload, ConsensusMessage, MessageFactory, PreparePayload, PreparedCertificate,
    RoundChangePayload, SignedMessage,
};
use crate::round::{RoundManager, RoundPhase};
use crate::round_change::{RoundChangeManager, RoundChangeOutcome};
use crate::round_id::RoundIdentifier;
use crate::traits::{BlockCreator, BlockImporter, BlockValidator, RoundTimer, Transport};
use crate::validation::MessageValidator;
use crate::validators::{ValidatorProvider, ValidatorSet};

/// Round engine timing configuration
#[derive(Debug, Clone)]
pub struct ConsensusConfig {
    /// Timeout for round 0; later rounds back off exponentially
    pub base_round_timeout: Duration,
    /// Upper bound on the per-round timeout
    pub max_round_timeout: Duration,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        ConsensusConfig {
            base_round_timeout: Duration::from_secs(1),
            max_round_timeout: Duration::from_secs(60),
        }
    }
}

impl ConsensusConfig {
    /// Exponential backoff: base * 2^round, capped
    pub fn round_timeout(&self, round: u32) -> Duration {
        let factor = 1u32.checked_shl(round.min(16)).unwrap_or(u32::MAX);
        self.base_round_timeout
            .saturating_mul(factor)
            .min(self.max_round_timeout)
    }
}

/// Per-sequence consensus driver.
///
/// Owns the active round, the round-change aggregator, and the round timer.
/// All inbound events for the sequence are fed through `handle_message` and
/// `handle_round_expiry` by a single consumer; message-level faults are
/// absorbed here and logged, never propagated.
pub struct Controller {
    sequence: u64,
    validators: ValidatorSet,
    config: ConsensusConfig,
    factory: Arc<MessageFactory>,
    transport: Arc<dyn Transport>,
    creator: Arc<dyn BlockCreator>,
    block_validator: Arc<dyn BlockValidator>,
    importer: Arc<dyn BlockImporter>,
    timer: Arc<dyn RoundTimer>,
    validator: MessageValidator,
    round: RoundManager,
    round_changes: RoundChangeManager,
    /// Highest-round prepared certificate this node has witnessed for the
    /// sequence. It rides on every own round-change message until a
    /// later-round certificate supersedes it, so the lock survives rounds
    /// that stall before forming one of their own.
    latest_certificate: Option<PreparedCertificate>,
    /// Validated messages for rounds of this sequence we have not reached
    /// yet, bounded per round and across rounds
    future_rounds: BTreeMap<u32, Vec<ConsensusMessage>>,
    /// Prepares/commits for the current round that arrived before its
    /// proposal, one slot per sender
    pending_prepares: BTreeMap<ValidatorId, SignedMessage<PreparePayload>>,
    pending_commits: BTreeMap<ValidatorId, SignedMessage<CommitPayload>>,
    complete: bool,
}

/// Distinct future rounds buffered ahead of the active one
const MAX_BUFFERED_ROUNDS: usize = 8;

impl Controller {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sequence: u64,
        provider: &dyn ValidatorProvider,
        config: ConsensusConfig,
        factory: Arc<MessageFactory>,
        transport: Arc<dyn Transport>,
        creator: Arc<dyn BlockCreator>,
        block_validator: Arc<dyn BlockValidator>,
        importer: Arc<dyn BlockImporter>,
        timer: Arc<dyn RoundTimer>,
    ) -> Result<Self, ConsensusError> {
        let validators = provider.validators_at(sequence)?;
        if validators.is_empty() {
            return Err(ConsensusError::EmptyValidatorSet(sequence));
        }

        let round = RoundManager::new(
            RoundIdentifier::new(sequence, 0),
            &validators,
            factory.clone(),
            transport.clone(),
            creator.clone(),
            block_validator.clone(),
            importer.clone(),
        );
        let round_changes = RoundChangeManager::new(
            validators.quorum_size(),
            validators.fault_tolerance(),
            factory.local_id(),
        );
        let validator = MessageValidator::new(sequence, validators.clone());

        Ok(Controller {
            sequence,
            validators,
            config,
            factory,
            transport,
            creator,
            block_validator,
            importer,
            timer,
            validator,
            round,
            round_changes,
            latest_certificate: None,
            future_rounds: BTreeMap::new(),
            pending_prepares: BTreeMap::new(),
            pending_commits: BTreeMap::new(),
            complete: false,
        })
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn current_round(&self) -> RoundIdentifier {
        self.round.round_id()
    }

    pub fn round_phase(&self) -> RoundPhase {
        self.round.phase()
    }

    /// True once this sequence's block was imported
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Total messages currently buffered for rounds ahead of the active one
    pub fn buffered_future_messages(&self) -> usize {
        self.future_rounds.values().map(Vec::len).sum()
    }

    /// Enter round 0 and arm its timer
    pub fn start(&mut self) {
        let round_id = self.round.round_id();
        self.timer.start(round_id, self.config.round_timeout(0));
        if let Err(e) = self.round.start(None) {
            warn!(sequence = self.sequence, error = %e, "failed to start round 0");
            self.start_round_change();
        }
    }

    /// Process one inbound wire message for this sequence. Every fault is
    /// absorbed here: a malformed or adversarial message must never prevent
    /// processing of the messages behind it.
    pub fn handle_message(&mut self, message: ConsensusMessage) {
        if self.complete {
            return;
        }
        let round_id = message.round_id();
        if round_id.sequence != self.sequence {
            debug!(
                got = %round_id,
                active = self.sequence,
                "message for another sequence dropped"
            );
            return;
        }

        // Round-change targets rounds ahead of us by design; it bypasses the
        // stale/future round guards below.
        let message = match message {
            ConsensusMessage::RoundChange(change) => {
                self.handle_round_change(change);
                return;
            }
            other => other,
        };

        let current = self.round.round_id().round;
        if round_id.round < current {
            debug!(round = %round_id, current, "stale-round message dropped");
            return;
        }
        if round_id.round > current {
            self.buffer_future(round_id.round, message);
            return;
        }

        match message {
            ConsensusMessage::Proposal(proposal) => self.handle_proposal(proposal),
            ConsensusMessage::Prepare(prepare) => self.handle_prepare(prepare),
            ConsensusMessage::Commit(commit) => self.handle_commit(commit),
            ConsensusMessage::RoundChange(_) => unreachable!("handled above"),
        }
    }

    /// Buffer a message for a round we have not reached. Buffered messages
    /// are fully validated first, and the buffer is bounded in both the
    /// number of rounds and the messages per round, so no peer can grow it
    /// without holding a validator key, and a held key only buys a bounded
    /// slice of memory.
    fn buffer_future(&mut self, round: u32, message: ConsensusMessage) {
        let checked = match &message {
            ConsensusMessage::Proposal(m) => self.validator.validate_proposal(m).map(|_| ()),
            ConsensusMessage::Prepare(m) => self.validator.validate_prepare(m).map(|_| ()),
            ConsensusMessage::Commit(m) => self.validator.validate_commit(m).map(|_| ()),
            ConsensusMessage::RoundChange(_) => return,
        };
        if let Err(e) = checked {
            warn!(round, error = %e, "future-round message discarded");
            return;
        }
        if !self.future_rounds.contains_key(&round) && self.future_rounds.len() >= MAX_BUFFERED_ROUNDS
        {
            debug!(round, "future-round buffer full, message dropped");
            return;
        }
        let slot = self.future_rounds.entry(round).or_default();
        if slot.len() >= 3 * self.validators.len() {
            debug!(round, "future-round buffer full, message dropped");
            return;
        }
        debug!(round, "future-round message buffered");
        slot.push(message);
    }

    fn handle_proposal(&mut self, proposal: SignedMessage<crate::message::ProposalPayload>) {
        if let Err(e) = self.validator.validate_proposal(&proposal) {
            warn!(round = %proposal.payload.round_id, error = %e, "proposal discarded");
            return;
        }
        match self.round.handle_proposal(proposal) {
            Ok(()) => self.drain_pending(),
            Err(ConsensusError::ValidationFailure(reason)) => {
                // Faulty proposer for this round; move on without it
                warn!(
                    round = %self.round.round_id(),
                    reason, "proposed block failed validation"
                );
                self.start_round_change();
            }
            Err(e) => debug!(round = %self.round.round_id(), error = %e, "proposal rejected"),
        }
    }

    fn handle_prepare(&mut self, prepare: SignedMessage<PreparePayload>) {
        let sender = match self.validator.validate_prepare(&prepare) {
            Ok(sender) => sender,
            Err(e) => {
                warn!(round = %prepare.payload.round_id, error = %e, "prepare discarded");
                return;
            }
        };
        if !self.round.has_proposal() {
            self.pending_prepares.insert(sender, prepare);
            return;
        }
        if let Err(e) = self.round.handle_prepare(sender, prepare) {
            // Mismatched digests are evidence of misbehavior but not fatal
            warn!(round = %self.round.round_id(), %sender, error = %e, "prepare rejected");
        }
    }

    fn handle_commit(&mut self, commit: SignedMessage<CommitPayload>) {
        let sender = match self.validator.validate_commit(&commit) {
            Ok(sender) => sender,
            Err(e) => {
                warn!(round = %commit.payload.round_id, error = %e, "commit discarded");
                return;
            }
        };
        if !self.round.has_proposal() {
            self.pending_commits.insert(sender, commit);
            return;
        }
        match self.round.handle_commit(sender, commit) {
            Ok(true) => self.finish_sequence(),
            Ok(false) => {}
            Err(ConsensusError::ImportFailure(reason)) => {
                warn!(
                    round = %self.round.round_id(),
                    reason, "block import failed, changing round"
                );
                self.start_round_change();
            }
            Err(e) => {
                warn!(round = %self.round.round_id(), %sender, error = %e, "commit rejected")
            }
        }
    }

    fn handle_round_change(&mut self, change: SignedMessage<RoundChangePayload>) {
        let sender = match self.validator.validate_round_change(&change) {
            Ok(sender) => sender,
            Err(e) => {
                warn!(round = %change.payload.round_id, error = %e, "round-change discarded");
                return;
            }
        };
        let current = self.round.round_id().round;
        match self.round_changes.add(sender, change, current) {
            RoundChangeOutcome::QuorumReached { round, certificate } => {
                self.advance_to_round(round, certificate);
            }
            RoundChangeOutcome::ShouldJump { round } => {
                info!(
                    sequence = self.sequence,
                    round, "peers are ahead, joining round change"
                );
                self.announce_round_change(round);
            }
            RoundChangeOutcome::None => {}
        }
    }

    /// The round-change timer fired. Stale expirations for superseded rounds
    /// are ignored; the active round is abandoned in favor of the next one.
    pub fn handle_round_expiry(&mut self, round_id: RoundIdentifier) {
        if self.complete {
            return;
        }
        if round_id != self.round.round_id() {
            debug!(expired = %round_id, current = %self.round.round_id(), "stale timer ignored");
            return;
        }
        info!(round = %round_id, "round expired");
        self.start_round_change();
    }

    /// Abandon the current round and ask peers to move to the next one
    fn start_round_change(&mut self) {
        let target = self.round.round_id().round + 1;
        self.announce_round_change(target);
    }

    fn announce_round_change(&mut self, target: u32) {
        // A certificate formed by the dying round supersedes the retained
        // one; a round that stalled before preparing leaves it untouched.
        if let Some(certificate) = self.round.abandon() {
            let newer = self
                .latest_certificate
                .as_ref()
                .map_or(true, |held| {
                    certificate.round_id().round > held.round_id().round
                });
            if newer {
                self.latest_certificate = Some(certificate);
            }
        }

        let message = match self.factory.create_round_change(
            RoundIdentifier::new(self.sequence, target),
            self.latest_certificate.clone(),
        ) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "failed to build round-change message");
                return;
            }
        };

        self.timer.cancel();
        self.transport
            .broadcast(&ConsensusMessage::RoundChange(message.clone()));

        // Our own round-change vote counts toward the quorum
        let current = self.round.round_id().round;
        if let RoundChangeOutcome::QuorumReached { round, certificate } =
            self.round_changes
                .add(self.factory.local_id(), message, current)
        {
            self.advance_to_round(round, certificate);
        }
    }

    /// Start a new round: discard the old round state, re-arm the timer, and
    /// replay any buffered messages for the new round.
    fn advance_to_round(&mut self, round: u32, certificate: Option<PreparedCertificate>) {
        let round_id = RoundIdentifier::new(self.sequence, round);
        info!(round = %round_id, "starting new round");

        self.timer.cancel();
        self.pending_prepares.clear();
        self.pending_commits.clear();
        self.round_changes.discard_rounds_at_or_below(round);

        self.round = RoundManager::new(
            round_id,
            &self.validators,
            self.factory.clone(),
            self.transport.clone(),
            self.creator.clone(),
            self.block_validator.clone(),
            self.importer.clone(),
        );
        self.timer
            .start(round_id, self.config.round_timeout(round));
        if let Err(e) = self.round.start(certificate) {
            warn!(round = %round_id, error = %e, "failed to start round");
            self.start_round_change();
            return;
        }
        // The proposer's own start may already complete a single-node quorum
        if self.round.phase() == RoundPhase::Committed {
            self.finish_sequence();
            return;
        }

        let buffered: Vec<ConsensusMessage> = self
            .future_rounds
            .remove(&round)
            .unwrap_or_default();
        let stale: Vec<u32> = self
            .future_rounds
            .range(..round)
            .map(|(&r, _)| r)
            .collect();
        for r in stale {
            self.future_rounds.remove(&r);
        }
        for message in buffered {
            self.handle_message(message);
        }
    }

    /// Replay prepares/commits that arrived before the proposal was accepted
    fn drain_pending(&mut self) {
        let prepares = std::mem::take(&mut self.pending_prepares);
        let digest = self.round.accepted_digest();
        for (sender, prepare) in prepares {
            if Some(prepare.payload.digest) != digest {
                warn!(%sender, "buffered prepare references a different digest");
                continue;
            }
            if let Err(e) = self.round.handle_prepare(sender, prepare) {
                warn!(%sender, error = %e, "buffered prepare rejected");
            }
        }

        let commits = std::mem::take(&mut self.pending_commits);
        for (sender, commit) in commits {
            if Some(commit.payload.digest) != digest {
                warn!(%sender, "buffered commit references a different digest");
                continue;
            }
            match self.round.handle_commit(sender, commit) {
                Ok(true) => {
                    self.finish_sequence();
                    return;
                }
                Ok(false) => {}
                Err(ConsensusError::ImportFailure(reason)) => {
                    warn!(reason, "block import failed, changing round");
                    self.start_round_change();
                    return;
                }
                Err(e) => warn!(%sender, error = %e, "buffered commit rejected"),
            }
        }
    }

    fn finish_sequence(&mut self) {
        info!(sequence = self.sequence, "sequence complete");
        self.complete = true;
        self.timer.cancel();
    }
}
