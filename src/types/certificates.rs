/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Proof that a quorum of a committee precommitted a value.

use borsh::{BorshDeserialize, BorshSerialize};

use super::{
    committee::{quorum, Committee},
    crypto_primitives::is_coordinator_signature,
    data_types::{Address, Height, Phase, SignatureBytes, ValueId},
};

/// The set of approving precommit signatures that a decided value is finalized with.
///
/// Signatures appear in ascending order of their signers' addresses, at most one per signer.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct QuorumCertificate {
    pub height: Height,
    pub phase: Phase,
    pub value_id: ValueId,
    pub signatures: Vec<(Address, SignatureBytes)>,
}

impl QuorumCertificate {
    /// Checks that every signature in the certificate is a correct signature over `value_id` by a member
    /// of `committee`, that no member signed twice, and that the signers form a quorum.
    pub fn is_correct(&self, committee: &Committee) -> bool {
        let mut previous: Option<&Address> = None;
        for (signer, signature) in &self.signatures {
            // Signers must be strictly ascending, which also rules out duplicates.
            if previous.is_some_and(|previous| previous >= signer) {
                return false;
            }
            previous = Some(signer);

            if !committee.contains(signer)
                || !is_coordinator_signature(signer, &self.value_id, signature)
            {
                return false;
            }
        }

        self.signatures.len() >= quorum(committee.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        crypto_primitives::{Keypair, SigningKey},
        data_types::Value,
    };

    fn keypairs(n: u8) -> Vec<Keypair> {
        let mut keypairs: Vec<Keypair> = (1..=n)
            .map(|i| Keypair::new(SigningKey::from_bytes(&[i; 32])))
            .collect();
        keypairs.sort_by_key(|keypair| keypair.address());
        keypairs
    }

    fn certificate(keypairs: &[Keypair], value_id: ValueId) -> QuorumCertificate {
        QuorumCertificate {
            height: Height::new(1),
            phase: Phase::new(0),
            value_id,
            signatures: keypairs
                .iter()
                .map(|keypair| (keypair.address(), keypair.sign_as_coordinator(&value_id)))
                .collect(),
        }
    }

    #[test]
    fn quorum_of_correct_signatures_is_correct() {
        let keypairs = keypairs(4);
        let committee = Committee::new(keypairs.iter().map(Keypair::address).collect());
        let value_id = Value::new(vec![1]).id();

        assert!(certificate(&keypairs[..3], value_id).is_correct(&committee));
        assert!(!certificate(&keypairs[..2], value_id).is_correct(&committee));
    }

    #[test]
    fn duplicate_or_foreign_signers_are_rejected() {
        let keypairs = keypairs(5);
        let committee = Committee::new(keypairs[..4].iter().map(Keypair::address).collect());
        let value_id = Value::new(vec![1]).id();

        let mut duplicated = certificate(&keypairs[..3], value_id);
        let first = duplicated.signatures[0];
        duplicated.signatures.insert(0, first);
        assert!(!duplicated.is_correct(&committee));

        let foreign = certificate(&keypairs[2..5], value_id);
        assert!(!foreign.is_correct(&committee));
    }
}
