use keystone_core::ValidatorId;
use serde::{Deserialize, Serialize};

use crate::error::ConsensusError;

/// Ordered, deduplicated set of validator identities, effective for one
/// sequence. Immutable for the lifetime of that sequence's rounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorSet {
    members: Vec<ValidatorId>,
}

impl ValidatorSet {
    pub fn new(mut members: Vec<ValidatorId>) -> Self {
        members.sort();
        members.dedup();
        ValidatorSet { members }
    }

    pub fn members(&self) -> &[ValidatorId] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, id: &ValidatorId) -> bool {
        self.members.binary_search(id).is_ok()
    }

    /// quorum(N) = floor(2N/3) + 1 distinct validators
    pub fn quorum_size(&self) -> usize {
        2 * self.members.len() / 3 + 1
    }

    /// Maximum tolerated Byzantine validators: f = floor((N - 1) / 3)
    pub fn fault_tolerance(&self) -> usize {
        self.members.len().saturating_sub(1) / 3
    }

    /// Deterministic round-robin proposer selection, offset by round number.
    /// All honest validators compute the same proposer without communication.
    ///
    /// The set must be non-empty.
    pub fn proposer_for(&self, sequence: u64, round: u32) -> ValidatorId {
        debug_assert!(
            !self.members.is_empty(),
            "proposer selection over an empty validator set"
        );
        let index = (sequence.wrapping_add(round as u64) % self.members.len() as u64) as usize;
        self.members[index]
    }
}

/// Resolves the validator set effective at a sequence
pub trait ValidatorProvider: Send + Sync {
    fn validators_at(&self, sequence: u64) -> Result<ValidatorSet, ConsensusError>;

    fn quorum_for(&self, sequence: u64) -> Result<usize, ConsensusError> {
        Ok(self.validators_at(sequence)?.quorum_size())
    }
}

/// Provider for a fixed validator set, used when the set is known at genesis
/// and never changes.
pub struct StaticValidatorProvider {
    set: ValidatorSet,
}

impl StaticValidatorProvider {
    pub fn new(set: ValidatorSet) -> Self {
        StaticValidatorProvider { set }
    }
}

impl ValidatorProvider for StaticValidatorProvider {
    fn validators_at(&self, _sequence: u64) -> Result<ValidatorSet, ConsensusError> {
        Ok(self.set.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keystone_core::NodeKey;

    fn ids(n: usize) -> Vec<ValidatorId> {
        (0..n).map(|_| NodeKey::generate().validator_id()).collect()
    }

    #[test]
    fn test_quorum_sizes() {
        assert_eq!(ValidatorSet::new(ids(4)).quorum_size(), 3);
        assert_eq!(ValidatorSet::new(ids(5)).quorum_size(), 4);
        assert_eq!(ValidatorSet::new(ids(7)).quorum_size(), 5);
    }

    #[test]
    fn test_fault_tolerance() {
        assert_eq!(ValidatorSet::new(ids(4)).fault_tolerance(), 1);
        assert_eq!(ValidatorSet::new(ids(7)).fault_tolerance(), 2);
        assert_eq!(ValidatorSet::new(ids(10)).fault_tolerance(), 3);
    }

    #[test]
    fn test_members_sorted_and_deduplicated() {
        let mut members = ids(3);
        members.push(members[0]);
        let set = ValidatorSet::new(members);
        assert_eq!(set.len(), 3);
        let mut sorted = set.members().to_vec();
        sorted.sort();
        assert_eq!(sorted, set.members());
    }

    #[test]
    fn test_proposer_rotation() {
        let set = ValidatorSet::new(ids(4));

        // Same inputs give the same proposer
        assert_eq!(set.proposer_for(1, 0), set.proposer_for(1, 0));

        // Rotation covers every validator across consecutive rounds
        let mut seen: Vec<ValidatorId> = (0..4).map(|r| set.proposer_for(1, r)).collect();
        seen.sort();
        assert_eq!(seen, set.members());

        // Advancing the round by N wraps around
        assert_eq!(set.proposer_for(1, 0), set.proposer_for(1, 4));
    }

    #[test]
    #[should_panic]
    fn test_proposer_for_empty_set_panics() {
        ValidatorSet::new(Vec::new()).proposer_for(1, 0);
    }

    #[test]
    fn test_static_provider() {
        let set = ValidatorSet::new(ids(4));
        let provider = StaticValidatorProvider::new(set.clone());
        assert_eq!(provider.validators_at(1).unwrap(), set);
        assert_eq!(provider.quorum_for(1).unwrap(), 3);
    }
}
