use std::collections::BTreeMap;

use keystone_core::ValidatorId;
use tracing::debug;

use crate::message::{PreparedCertificate, RoundChangePayload, SignedMessage};

/// Result of absorbing a round-change message
#[derive(Debug, Clone)]
pub enum RoundChangeOutcome {
    /// Nothing actionable yet
    None,
    /// A quorum of validators wants `round`; start it, re-proposing the
    /// certificate's block if one is carried.
    QuorumReached {
        round: u32,
        certificate: Option<PreparedCertificate>,
    },
    /// f + 1 validators are already past the current round; the local node
    /// should abandon its round and announce a round change for `round`.
    ShouldJump { round: u32 },
}

/// Aggregates round-change messages across rounds for the active sequence.
///
/// Messages are grouped by target round, one counted per sender per target.
/// Certificates carried inside messages are validated upstream before they
/// reach this point.
pub struct RoundChangeManager {
    quorum: usize,
    jump_threshold: usize,
    local_id: ValidatorId,
    /// target round -> sender -> message
    received: BTreeMap<u32, BTreeMap<ValidatorId, SignedMessage<RoundChangePayload>>>,
    /// Highest round the local node has already announced a change to
    announced: Option<u32>,
}

impl RoundChangeManager {
    pub fn new(quorum: usize, fault_tolerance: usize, local_id: ValidatorId) -> Self {
        RoundChangeManager {
            quorum,
            jump_threshold: fault_tolerance + 1,
            local_id,
            received: BTreeMap::new(),
            announced: None,
        }
    }

    /// Absorb one round-change message, given the local node's current round
    pub fn add(
        &mut self,
        sender: ValidatorId,
        message: SignedMessage<RoundChangePayload>,
        current_round: u32,
    ) -> RoundChangeOutcome {
        let target = message.payload.round_id.round;
        if target <= current_round {
            debug!(target, current_round, "stale round-change dropped");
            return RoundChangeOutcome::None;
        }

        let per_round = self.received.entry(target).or_default();
        if per_round.contains_key(&sender) {
            debug!(target, %sender, "duplicate round-change ignored");
            return RoundChangeOutcome::None;
        }
        per_round.insert(sender, message);

        // The local node's own announcement must never feed the jump rule
        // back to itself
        if sender == self.local_id && self.announced.map_or(true, |r| r < target) {
            self.announced = Some(target);
        }

        // Lowest target beyond the current round with a full quorum wins
        for (&round, messages) in self.received.range(current_round + 1..) {
            if messages.len() >= self.quorum {
                let certificate = Self::best_certificate(messages.values());
                return RoundChangeOutcome::QuorumReached { round, certificate };
            }
        }

        // f + 1 distinct peers ahead of us means at least one honest node
        // timed out; catch up to the lowest round they ask for.
        let mut ahead: BTreeMap<ValidatorId, u32> = BTreeMap::new();
        for (&round, messages) in self.received.range(current_round + 1..) {
            for sender in messages.keys() {
                if *sender == self.local_id {
                    continue;
                }
                let entry = ahead.entry(*sender).or_insert(round);
                if round < *entry {
                    *entry = round;
                }
            }
        }
        if ahead.len() >= self.jump_threshold {
            let lowest = ahead.values().copied().min().unwrap_or(current_round + 1);
            if self.announced.map_or(true, |r| r < lowest) {
                self.announced = Some(lowest);
                return RoundChangeOutcome::ShouldJump { round: lowest };
            }
        }

        RoundChangeOutcome::None
    }

    /// Among collected messages, the certificate formed in the highest round
    /// is the binding one.
    fn best_certificate<'a, I>(messages: I) -> Option<PreparedCertificate>
    where
        I: Iterator<Item = &'a SignedMessage<RoundChangePayload>>,
    {
        messages
            .filter_map(|m| m.payload.prepared.as_ref())
            .max_by_key(|cert| cert.round_id().round)
            .cloned()
    }

    /// Drop bookkeeping for rounds at or below the newly started round
    pub fn discard_rounds_at_or_below(&mut self, round: u32) {
        self.received = self.received.split_off(&(round + 1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageFactory;
    use crate::round_id::RoundIdentifier;
    use keystone_core::{Block, BlockHeader, Hash, NodeKey, ValidatorId};

    fn round_change(
        key: &NodeKey,
        round: u32,
        prepared: Option<PreparedCertificate>,
    ) -> SignedMessage<RoundChangePayload> {
        MessageFactory::new(key.clone())
            .create_round_change(RoundIdentifier::new(1, round), prepared)
            .unwrap()
    }

    fn certificate_for_round(keys: &[NodeKey], round: u32) -> PreparedCertificate {
        let round_id = RoundIdentifier::new(1, round);
        let header = BlockHeader {
            chain_id: 1,
            sequence: 1,
            parent_hash: Hash::ZERO,
            timestamp: 1000,
            proposer: ValidatorId::default(),
        };
        let block = Block::new(header, vec![round as u8]);
        let digest = block.hash().unwrap();

        let proposal = MessageFactory::new(keys[0].clone())
            .create_proposal(round_id, block)
            .unwrap();
        let prepares = keys[1..3]
            .iter()
            .map(|k| {
                MessageFactory::new(k.clone())
                    .create_prepare(round_id, digest)
                    .unwrap()
            })
            .collect();
        PreparedCertificate { proposal, prepares }
    }

    #[test]
    fn test_quorum_triggers_round_start() {
        let keys: Vec<NodeKey> = (0..4).map(|_| NodeKey::generate()).collect();
        let mut manager = RoundChangeManager::new(3, 1, NodeKey::generate().validator_id());

        for key in &keys[..2] {
            let outcome = manager.add(key.validator_id(), round_change(key, 1, None), 0);
            assert!(matches!(
                outcome,
                RoundChangeOutcome::None | RoundChangeOutcome::ShouldJump { .. }
            ));
        }
        let outcome = manager.add(keys[2].validator_id(), round_change(&keys[2], 1, None), 0);
        match outcome {
            RoundChangeOutcome::QuorumReached { round, certificate } => {
                assert_eq!(round, 1);
                assert!(certificate.is_none());
            }
            other => panic!("expected quorum, got {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_sender_not_double_counted() {
        let keys: Vec<NodeKey> = (0..4).map(|_| NodeKey::generate()).collect();
        let mut manager = RoundChangeManager::new(3, 1, NodeKey::generate().validator_id());

        manager.add(keys[0].validator_id(), round_change(&keys[0], 1, None), 0);
        let outcome = manager.add(keys[0].validator_id(), round_change(&keys[0], 1, None), 0);
        assert!(matches!(outcome, RoundChangeOutcome::None));
    }

    #[test]
    fn test_highest_round_certificate_selected() {
        let keys: Vec<NodeKey> = (0..4).map(|_| NodeKey::generate()).collect();
        let mut manager = RoundChangeManager::new(3, 1, NodeKey::generate().validator_id());

        let low = certificate_for_round(&keys, 0);
        let high = certificate_for_round(&keys, 1);
        let expected = high.block().clone();

        manager.add(keys[0].validator_id(), round_change(&keys[0], 2, Some(low)), 1);
        manager.add(keys[1].validator_id(), round_change(&keys[1], 2, Some(high)), 1);
        let outcome = manager.add(keys[2].validator_id(), round_change(&keys[2], 2, None), 1);

        match outcome {
            RoundChangeOutcome::QuorumReached { round, certificate } => {
                assert_eq!(round, 2);
                assert_eq!(certificate.unwrap().block(), &expected);
            }
            other => panic!("expected quorum, got {other:?}"),
        }
    }

    #[test]
    fn test_f_plus_one_jump() {
        let keys: Vec<NodeKey> = (0..4).map(|_| NodeKey::generate()).collect();
        let mut manager = RoundChangeManager::new(3, 1, NodeKey::generate().validator_id());

        manager.add(keys[0].validator_id(), round_change(&keys[0], 3, None), 0);
        let outcome = manager.add(keys[1].validator_id(), round_change(&keys[1], 2, None), 0);
        match outcome {
            RoundChangeOutcome::ShouldJump { round } => assert_eq!(round, 2),
            other => panic!("expected jump, got {other:?}"),
        }

        // A repeat observation does not re-announce the same jump
        let outcome = manager.add(keys[2].validator_id(), round_change(&keys[2], 2, None), 0);
        assert!(matches!(
            outcome,
            RoundChangeOutcome::QuorumReached { .. } | RoundChangeOutcome::None
        ));
    }

    #[test]
    fn test_own_message_does_not_count_toward_jump() {
        let keys: Vec<NodeKey> = (0..4).map(|_| NodeKey::generate()).collect();
        let local = keys[0].validator_id();
        let mut manager = RoundChangeManager::new(3, 1, local);

        // Our own announcement plus a single peer must not look like f + 1
        // validators ahead of us
        manager.add(local, round_change(&keys[0], 1, None), 0);
        let outcome = manager.add(keys[1].validator_id(), round_change(&keys[1], 1, None), 0);
        assert!(matches!(outcome, RoundChangeOutcome::None));

        // A third distinct sender completes the quorum for the target round
        let outcome = manager.add(keys[2].validator_id(), round_change(&keys[2], 1, None), 0);
        assert!(matches!(
            outcome,
            RoundChangeOutcome::QuorumReached { round: 1, .. }
        ));
    }

    #[test]
    fn test_stale_targets_dropped() {
        let keys: Vec<NodeKey> = (0..4).map(|_| NodeKey::generate()).collect();
        let mut manager = RoundChangeManager::new(3, 1, NodeKey::generate().validator_id());

        let outcome = manager.add(keys[0].validator_id(), round_change(&keys[0], 1, None), 1);
        assert!(matches!(outcome, RoundChangeOutcome::None));

        let outcome = manager.add(keys[0].validator_id(), round_change(&keys[0], 0, None), 1);
        assert!(matches!(outcome, RoundChangeOutcome::None));
    }

    #[test]
    fn test_discard_clears_started_rounds() {
        let keys: Vec<NodeKey> = (0..4).map(|_| NodeKey::generate()).collect();
        let mut manager = RoundChangeManager::new(3, 1, NodeKey::generate().validator_id());

        manager.add(keys[0].validator_id(), round_change(&keys[0], 1, None), 0);
        manager.add(keys[1].validator_id(), round_change(&keys[1], 1, None), 0);
        manager.discard_rounds_at_or_below(1);

        // Quorum must now be rebuilt from scratch for a later round
        let outcome = manager.add(keys[2].validator_id(), round_change(&keys[2], 1, None), 1);
        assert!(matches!(outcome, RoundChangeOutcome::None));
    }
}
