/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for structured messages that are gossiped between coordinators.
//!
//! Every message is scoped by a `(height, phase)` pair and is carried under a [`TopicKey`] derived from
//! its [`MessageKind`], height, and phase, so that the gossip transport's own deduplication suppresses
//! retransmissions of the same message.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::{
    crypto_primitives::Keypair,
    data_types::{Address, Height, Phase, SignatureBytes, Value, ValueId},
};

/// Kind of a [`GossipMessage`], which also orders the deferred messages of a sender.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshSerialize, BorshDeserialize,
)]
pub enum MessageKind {
    Proposal = 1,
    Prevote = 2,
    Precommit = 3,
}

/// Key of the gossip topic that a message is published under.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshSerialize, BorshDeserialize,
)]
pub struct TopicKey {
    pub kind: MessageKind,
    pub height: Height,
    pub phase: Phase,
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum GossipMessage {
    Proposal(Proposal),
    Prevote(Prevote),
    Precommit(Precommit),
}

impl GossipMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            GossipMessage::Proposal(_) => MessageKind::Proposal,
            GossipMessage::Prevote(_) => MessageKind::Prevote,
            GossipMessage::Precommit(_) => MessageKind::Precommit,
        }
    }

    /// Returns the address of the coordinator that created this message.
    pub fn sender(&self) -> Address {
        match self {
            GossipMessage::Proposal(Proposal { sender, .. }) => *sender,
            GossipMessage::Prevote(Prevote { sender, .. }) => *sender,
            GossipMessage::Precommit(Precommit { sender, .. }) => *sender,
        }
    }

    pub fn height(&self) -> Height {
        match self {
            GossipMessage::Proposal(Proposal { height, .. }) => *height,
            GossipMessage::Prevote(Prevote { height, .. }) => *height,
            GossipMessage::Precommit(Precommit { height, .. }) => *height,
        }
    }

    pub fn phase(&self) -> Phase {
        match self {
            GossipMessage::Proposal(Proposal { phase, .. }) => *phase,
            GossipMessage::Prevote(Prevote { phase, .. }) => *phase,
            GossipMessage::Precommit(Precommit { phase, .. }) => *phase,
        }
    }

    /// Returns the topic that this message should be published under.
    pub fn topic(&self) -> TopicKey {
        TopicKey {
            kind: self.kind(),
            height: self.height(),
            phase: self.phase(),
        }
    }
}

impl From<Proposal> for GossipMessage {
    fn from(proposal: Proposal) -> Self {
        GossipMessage::Proposal(proposal)
    }
}

impl From<Prevote> for GossipMessage {
    fn from(prevote: Prevote) -> Self {
        GossipMessage::Prevote(prevote)
    }
}

impl From<Precommit> for GossipMessage {
    fn from(precommit: Precommit) -> Self {
        GossipMessage::Precommit(precommit)
    }
}

/// A proposer's candidate for `(height, phase)`.
///
/// `source_phase` is the phase at which `value` last reached a prevote quorum, if the proposer is
/// re-proposing a value that it saw become valid. It is `None` for freshly composed values.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Proposal {
    pub sender: Address,
    pub height: Height,
    pub phase: Phase,
    pub value: Value,
    pub source_phase: Option<Phase>,
    pub signature: SignatureBytes,
}

impl Proposal {
    /// Create a `Proposal` of `value` by `me`, signed over the value's ID.
    pub(crate) fn new(
        me: &Keypair,
        height: Height,
        phase: Phase,
        value: Value,
        source_phase: Option<Phase>,
    ) -> Proposal {
        let signature = me.sign_as_coordinator(&value.id());
        Proposal {
            sender: me.address(),
            height,
            phase,
            value,
            source_phase,
            signature,
        }
    }
}

/// A prevote. A `value_id` of `None` is a nil prevote.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Prevote {
    pub sender: Address,
    pub height: Height,
    pub phase: Phase,
    pub value_id: Option<ValueId>,
}

impl Prevote {
    pub(crate) fn new(
        me: &Keypair,
        height: Height,
        phase: Phase,
        value_id: Option<ValueId>,
    ) -> Prevote {
        Prevote {
            sender: me.address(),
            height,
            phase,
            value_id,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Precommit {
    pub sender: Address,
    pub height: Height,
    pub phase: Phase,
    pub value_id: Option<ValueId>,
    pub signature: Option<SignatureBytes>,
}

impl Precommit {
    /// Create a `Precommit` by `me`. Non-nil precommits are signed over the value ID; nil precommits
    /// carry no signature.
    pub(crate) fn new(
        me: &Keypair,
        height: Height,
        phase: Phase,
        value_id: Option<ValueId>,
    ) -> Precommit {
        Precommit {
            sender: me.address(),
            height,
            phase,
            value_id,
            signature: value_id.map(|value_id| me.sign_as_coordinator(&value_id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::crypto_primitives::{is_coordinator_signature, SigningKey};

    #[test]
    fn topic_is_derived_from_kind_height_and_phase() {
        let me = Keypair::new(SigningKey::from_bytes(&[1u8; 32]));
        let prevote = GossipMessage::from(Prevote::new(&me, Height::new(9), Phase::new(2), None));

        assert_eq!(
            prevote.topic(),
            TopicKey {
                kind: MessageKind::Prevote,
                height: Height::new(9),
                phase: Phase::new(2),
            }
        );
        assert_eq!(prevote.sender(), me.address());
    }

    #[test]
    fn only_non_nil_precommits_are_signed() {
        let me = Keypair::new(SigningKey::from_bytes(&[1u8; 32]));
        let value_id = Value::new(vec![42]).id();

        let signed = Precommit::new(&me, Height::new(1), Phase::new(0), Some(value_id));
        let signature = signed.signature.expect("non-nil precommit must be signed");
        assert!(is_coordinator_signature(&me.address(), &value_id, &signature));

        let nil = Precommit::new(&me, Height::new(1), Phase::new(0), None);
        assert!(nil.signature.is_none());
    }

    #[test]
    fn messages_survive_the_wire() {
        let me = Keypair::new(SigningKey::from_bytes(&[3u8; 32]));
        let proposal = GossipMessage::from(Proposal::new(
            &me,
            Height::new(100),
            Phase::new(1),
            Value::new(b"anchor".to_vec()),
            Some(Phase::new(0)),
        ));

        let bytes = proposal.try_to_vec().unwrap();
        assert_eq!(GossipMessage::try_from_slice(&bytes).unwrap(), proposal);
    }
}
