//! Message validation boundary. Every inbound message passes through here
//! before it can touch round state; all rejection paths are non-fatal and the
//! caller is expected to discard and continue.

use std::collections::BTreeSet;

use keystone_core::ValidatorId;

use crate::error::ConsensusError;
use crate::message::{
    CommitPayload, Payload, PreparePayload, PreparedCertificate, ProposalPayload,
    RoundChangePayload, SignedMessage,
};
use crate::validators::ValidatorSet;

/// Validates signer membership, authorship, and digest consistency for one
/// sequence's validator set.
pub struct MessageValidator {
    sequence: u64,
    validators: ValidatorSet,
}

impl MessageValidator {
    pub fn new(sequence: u64, validators: ValidatorSet) -> Self {
        MessageValidator {
            sequence,
            validators,
        }
    }

    pub fn validators(&self) -> &ValidatorSet {
        &self.validators
    }

    /// Recover the author and require validator-set membership
    fn known_author<P: Payload>(
        &self,
        message: &SignedMessage<P>,
    ) -> Result<ValidatorId, ConsensusError> {
        let author = message.author()?;
        if !self.validators.contains(&author) {
            return Err(ConsensusError::UnknownSigner(author));
        }
        Ok(author)
    }

    /// A proposal must come from the round's selected proposer and carry a
    /// block built for this sequence.
    pub fn validate_proposal(
        &self,
        message: &SignedMessage<ProposalPayload>,
    ) -> Result<ValidatorId, ConsensusError> {
        let author = self.known_author(message)?;
        let round_id = message.payload.round_id;

        let expected = self
            .validators
            .proposer_for(round_id.sequence, round_id.round);
        if author != expected {
            return Err(ConsensusError::NotProposer {
                expected,
                got: author,
            });
        }
        if message.payload.block.header.sequence != round_id.sequence {
            return Err(ConsensusError::MismatchedDigest);
        }
        Ok(author)
    }

    pub fn validate_prepare(
        &self,
        message: &SignedMessage<PreparePayload>,
    ) -> Result<ValidatorId, ConsensusError> {
        self.known_author(message)
    }

    /// A commit's seal must recover, over the stated digest, to the same
    /// validator that signed the envelope. A seal that recovers elsewhere can
    /// never contribute to the finalized block and is discarded.
    pub fn validate_commit(
        &self,
        message: &SignedMessage<CommitPayload>,
    ) -> Result<ValidatorId, ConsensusError> {
        let author = self.known_author(message)?;
        let sealer = message
            .payload
            .commit_seal
            .recover(&message.payload.digest)
            .map_err(|_| ConsensusError::InvalidSignature)?;
        if sealer != author {
            return Err(ConsensusError::InvalidSignature);
        }
        Ok(author)
    }

    pub fn validate_round_change(
        &self,
        message: &SignedMessage<RoundChangePayload>,
    ) -> Result<ValidatorId, ConsensusError> {
        let author = self.known_author(message)?;
        if let Some(certificate) = &message.payload.prepared {
            self.validate_certificate(certificate, message.payload.round_id.round)?;
        }
        Ok(author)
    }

    /// Check a prepared certificate end to end: proposal authorship, prepare
    /// signers, digest agreement, and quorum arithmetic.
    pub fn validate_certificate(
        &self,
        certificate: &PreparedCertificate,
        target_round: u32,
    ) -> Result<(), ConsensusError> {
        let cert_round = certificate.round_id();
        if cert_round.sequence != self.sequence {
            return Err(ConsensusError::InvalidCertificate(format!(
                "certificate sequence {} does not match {}",
                cert_round.sequence, self.sequence
            )));
        }
        if cert_round.round >= target_round {
            return Err(ConsensusError::InvalidCertificate(format!(
                "certificate round {} not below target {}",
                cert_round.round, target_round
            )));
        }

        let proposer = self.validate_proposal(&certificate.proposal)?;
        let digest = certificate.digest()?;

        let mut senders = BTreeSet::new();
        for prepare in &certificate.prepares {
            let sender = self.validate_prepare(prepare)?;
            if sender == proposer {
                return Err(ConsensusError::InvalidCertificate(
                    "prepare signed by the proposer".to_string(),
                ));
            }
            if prepare.payload.round_id != cert_round {
                return Err(ConsensusError::InvalidCertificate(
                    "prepare for a different round".to_string(),
                ));
            }
            if prepare.payload.digest != digest {
                return Err(ConsensusError::MismatchedDigest);
            }
            senders.insert(sender);
        }

        // Proposer's implicit agreement plus distinct prepare senders
        let quorum = self.validators.quorum_size();
        if senders.len() + 1 < quorum {
            return Err(ConsensusError::InsufficientQuorum {
                have: senders.len() + 1,
                need: quorum,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageFactory;
    use crate::round_id::RoundIdentifier;
    use keystone_core::{hash_blake3, sign_digest, Block, BlockHeader, Hash, NodeKey};

    struct Fixture {
        keys: Vec<NodeKey>,
        validator: MessageValidator,
        set: ValidatorSet,
    }

    fn fixture(n: usize) -> Fixture {
        let keys: Vec<NodeKey> = (0..n).map(|_| NodeKey::generate()).collect();
        let set = ValidatorSet::new(keys.iter().map(|k| k.validator_id()).collect());
        let validator = MessageValidator::new(1, set.clone());
        Fixture {
            keys,
            validator,
            set,
        }
    }

    fn key_for(f: &Fixture, id: ValidatorId) -> &NodeKey {
        f.keys
            .iter()
            .find(|k| k.validator_id() == id)
            .expect("key present")
    }

    fn proposer_key(f: &Fixture, round_id: RoundIdentifier) -> &NodeKey {
        key_for(f, f.set.proposer_for(round_id.sequence, round_id.round))
    }

    fn non_proposer_keys<'a>(f: &'a Fixture, round_id: RoundIdentifier) -> Vec<&'a NodeKey> {
        let proposer = f.set.proposer_for(round_id.sequence, round_id.round);
        f.keys
            .iter()
            .filter(|k| k.validator_id() != proposer)
            .collect()
    }

    fn test_block(sequence: u64) -> Block {
        let header = BlockHeader {
            chain_id: 1,
            sequence,
            parent_hash: Hash::ZERO,
            timestamp: 1000,
            proposer: ValidatorId::default(),
        };
        Block::new(header, Vec::new())
    }

    #[test]
    fn test_unknown_signer_rejected() {
        let f = fixture(4);
        let outsider = MessageFactory::new(NodeKey::generate());
        let prepare = outsider
            .create_prepare(RoundIdentifier::new(1, 0), Hash::ZERO)
            .unwrap();
        assert!(matches!(
            f.validator.validate_prepare(&prepare),
            Err(ConsensusError::UnknownSigner(_))
        ));
    }

    #[test]
    fn test_proposal_from_wrong_validator_rejected() {
        let f = fixture(4);
        let round_id = RoundIdentifier::new(1, 0);
        let wrong = non_proposer_keys(&f, round_id)[0];

        let proposal = MessageFactory::new(wrong.clone())
            .create_proposal(round_id, test_block(1))
            .unwrap();
        assert!(matches!(
            f.validator.validate_proposal(&proposal),
            Err(ConsensusError::NotProposer { .. })
        ));
    }

    #[test]
    fn test_proposal_from_selected_proposer_accepted() {
        let f = fixture(4);
        let round_id = RoundIdentifier::new(1, 0);
        let proposer = proposer_key(&f, round_id);

        let proposal = MessageFactory::new(proposer.clone())
            .create_proposal(round_id, test_block(1))
            .unwrap();
        assert_eq!(
            f.validator.validate_proposal(&proposal).unwrap(),
            proposer.validator_id()
        );
    }

    #[test]
    fn test_commit_with_foreign_seal_rejected() {
        let f = fixture(4);
        let round_id = RoundIdentifier::new(1, 0);
        let digest = test_block(1).hash().unwrap();

        // Envelope honestly signed by keys[0], but the seal inside was
        // produced by keys[1]. The seal recovers to a validator, just not the
        // message author.
        let payload = CommitPayload {
            round_id,
            digest,
            commit_seal: sign_digest(&f.keys[1], &digest).unwrap(),
        };
        let envelope_digest = payload.signing_digest().unwrap();
        let commit = SignedMessage {
            payload,
            signature: sign_digest(&f.keys[0], &envelope_digest).unwrap(),
        };

        assert!(matches!(
            f.validator.validate_commit(&commit),
            Err(ConsensusError::InvalidSignature)
        ));
    }

    #[test]
    fn test_commit_with_garbage_seal_rejected() {
        let f = fixture(4);
        let round_id = RoundIdentifier::new(1, 0);
        let digest = test_block(1).hash().unwrap();

        let factory = MessageFactory::new(f.keys[0].clone());
        let valid = factory.create_commit(round_id, digest).unwrap();
        let tampered = SignedMessage {
            payload: CommitPayload {
                commit_seal: keystone_core::Seal([0xab; 65]),
                ..valid.payload
            },
            signature: valid.signature,
        };
        assert!(f.validator.validate_commit(&tampered).is_err());
    }

    fn build_certificate(f: &Fixture, round_id: RoundIdentifier, prepare_count: usize) -> PreparedCertificate {
        let proposer = proposer_key(f, round_id);
        let block = test_block(round_id.sequence);
        let digest = block.hash().unwrap();

        let proposal = MessageFactory::new(proposer.clone())
            .create_proposal(round_id, block)
            .unwrap();
        let prepares = non_proposer_keys(f, round_id)
            .into_iter()
            .take(prepare_count)
            .map(|k| {
                MessageFactory::new(k.clone())
                    .create_prepare(round_id, digest)
                    .unwrap()
            })
            .collect();
        PreparedCertificate { proposal, prepares }
    }

    #[test]
    fn test_valid_certificate_accepted() {
        let f = fixture(4);
        let cert = build_certificate(&f, RoundIdentifier::new(1, 0), 2);
        f.validator.validate_certificate(&cert, 1).unwrap();
    }

    #[test]
    fn test_certificate_below_quorum_rejected() {
        let f = fixture(4);
        let cert = build_certificate(&f, RoundIdentifier::new(1, 0), 1);
        assert!(matches!(
            f.validator.validate_certificate(&cert, 1),
            Err(ConsensusError::InsufficientQuorum { have: 2, need: 3 })
        ));
    }

    #[test]
    fn test_certificate_round_not_below_target_rejected() {
        let f = fixture(4);
        let cert = build_certificate(&f, RoundIdentifier::new(1, 1), 2);
        assert!(f.validator.validate_certificate(&cert, 1).is_err());
    }

    #[test]
    fn test_certificate_mismatched_prepare_digest_rejected() {
        let f = fixture(4);
        let round_id = RoundIdentifier::new(1, 0);
        let mut cert = build_certificate(&f, round_id, 2);

        let stranger_digest = hash_blake3(b"some other block");
        let signer = key_for(&f, cert.prepares[0].author().unwrap());
        cert.prepares[0] = MessageFactory::new(signer.clone())
            .create_prepare(round_id, stranger_digest)
            .unwrap();

        assert!(matches!(
            f.validator.validate_certificate(&cert, 1),
            Err(ConsensusError::MismatchedDigest)
        ));
    }

    #[test]
    fn test_round_change_without_certificate_accepted() {
        let f = fixture(4);
        let change = MessageFactory::new(f.keys[0].clone())
            .create_round_change(RoundIdentifier::new(1, 1), None)
            .unwrap();
        f.validator.validate_round_change(&change).unwrap();
    }
}
