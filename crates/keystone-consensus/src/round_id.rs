use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one attempt to agree on the block at a given chain height.
/// Ordered by sequence, then round.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct RoundIdentifier {
    /// Chain height being agreed upon
    pub sequence: u64,
    /// Agreement attempt within the sequence
    pub round: u32,
}

impl RoundIdentifier {
    pub fn new(sequence: u64, round: u32) -> Self {
        RoundIdentifier { sequence, round }
    }

    /// The identifier of the next round within the same sequence
    pub fn next_round(&self) -> Self {
        RoundIdentifier {
            sequence: self.sequence,
            round: self.round + 1,
        }
    }
}

impl fmt::Display for RoundIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.sequence, self.round)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering_by_sequence_then_round() {
        let a = RoundIdentifier::new(1, 5);
        let b = RoundIdentifier::new(2, 0);
        let c = RoundIdentifier::new(2, 1);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_next_round() {
        let id = RoundIdentifier::new(7, 2);
        assert_eq!(id.next_round(), RoundIdentifier::new(7, 3));
    }
}
