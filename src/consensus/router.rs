/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Validation, deferral, and tallying of inbound gossip.
//!
//! A message received from the network goes through three gates before it touches a [`VoteTally`]:
//! 1. **Topic and height**: it must have been published under its own topic, and its height must not be
//!    behind the current height. Messages for heights slightly ahead are parked until the height starts,
//!    up to a fixed number of parked messages per height. Phases too far ahead are dropped.
//! 2. **Committee**: its sender must be a member of the height's committee other than the local
//!    coordinator. Proposals must come from the phase's proposer and carry a valid signature, and
//!    non-nil precommits must carry a valid signature.
//! 3. **Proposal**: non-nil votes can only be classified as approving or opposing once the proposal of
//!    their phase is known, so they are parked until then.
//!
//! [`VoteTally`]: crate::store::VoteTally

use std::time::{Instant, SystemTime};

use crate::{
    app::{App, Committees, ValidateValueRequest, ValidateValueResponse},
    events::{Event, ReceivePrecommitEvent, ReceivePrevoteEvent, ReceiveProposalEvent},
    messages::{GossipMessage, MessageKind, Precommit, Prevote, Proposal, TopicKey},
    networking::Network,
    store::{DeferredKey, RecordedProposal},
    types::{
        crypto_primitives::is_coordinator_signature,
        data_types::{Phase, Validity},
    },
};

use super::{
    implementation::{Consensus, PendingValidation},
    ConsensusError,
};

impl<N: Network, A: App, C: Committees> Consensus<N, A, C> {
    /// Process a message received from the network under `topic`, then re-evaluate the decision rules.
    pub(crate) fn on_receive_gossip(
        &mut self,
        topic: TopicKey,
        message: GossipMessage,
    ) -> Result<(), ConsensusError> {
        if topic != message.topic() {
            log::debug!(
                "Dropping {:?} from {:?} published under a mismatched topic",
                message.kind(),
                message.sender()
            );
            return Ok(());
        }
        if !self.state.started || self.is_halted() {
            return Ok(());
        }

        self.route(message);
        self.evaluate()
    }

    /// Drop, defer, or dispatch `message`.
    pub(super) fn route(&mut self, message: GossipMessage) {
        let height = message.height();
        if height < self.state.height {
            return;
        }

        // Phases of later heights are counted from the first phase.
        let base_phase = if height == self.state.height {
            self.state.phase
        } else {
            Phase::init()
        };
        if message.phase().int() > base_phase.int().saturating_add(self.config.max_future_phases) {
            log::debug!(
                "Dropping {:?} for height {}, phase {}, too far ahead of phase {}",
                message.kind(),
                height,
                message.phase(),
                base_phase
            );
            return;
        }

        if height > self.state.height {
            if height.int() - self.state.height.int() <= self.config.future_height_window {
                self.defer(message);
            }
            return;
        }

        let phase = message.phase();
        let (is_member, proposer) = match self.store.committee(height) {
            Some(resolved) => (
                resolved.committee.contains(&message.sender()),
                resolved
                    .committee
                    .proposer_at(height, phase, self.config.proposer_offset),
            ),
            None => {
                self.defer(message);
                return;
            }
        };
        if !is_member || message.sender() == self.me() {
            return;
        }

        match message {
            GossipMessage::Proposal(proposal) => {
                if Some(proposal.sender) == proposer {
                    self.on_receive_proposal(proposal)
                } else {
                    log::debug!(
                        "Dropping proposal from {:?}, which is not the proposer of height {}, phase {}",
                        proposal.sender,
                        height,
                        phase
                    );
                }
            }
            GossipMessage::Prevote(prevote) => self.on_receive_prevote(prevote),
            GossipMessage::Precommit(precommit) => self.on_receive_precommit(precommit),
        }
    }

    fn defer(&mut self, message: GossipMessage) {
        let height = message.height();
        if self
            .store
            .get(height)
            .is_some_and(|entry| entry.deferred_len() >= self.config.deferred_capacity)
        {
            log::debug!(
                "Dropping {:?} from {:?}, height {} has no room for more deferred messages",
                message.kind(),
                message.sender(),
                height
            );
            return;
        }

        let key = DeferredKey::new(message.kind(), message.sender());
        self.store
            .tally_mut(height, message.phase())
            .defer(key, message);
    }

    fn on_receive_proposal(&mut self, proposal: Proposal) {
        let (height, phase) = (proposal.height, proposal.phase);
        if !is_coordinator_signature(&proposal.sender, &proposal.value.id(), &proposal.signature) {
            log::debug!(
                "Dropping proposal from {:?} with an invalid signature",
                proposal.sender
            );
            return;
        }

        let tally = self.store.tally_mut(height, phase);
        if tally.proposal().is_some() || self.pending_validations.contains_key(&(height, phase)) {
            return;
        }
        tally.note_sender(proposal.sender);

        Event::ReceiveProposal(ReceiveProposalEvent {
            timestamp: SystemTime::now(),
            origin: proposal.sender,
            proposal: proposal.clone(),
        })
        .publish(&self.event_publisher);

        self.validate_proposal(proposal);
    }

    /// Ask the app to validate the value of `proposal` and record the proposal with the verdict. If the
    /// app cannot judge the value yet, validation is retried later.
    pub(super) fn validate_proposal(&mut self, proposal: Proposal) {
        let request = ValidateValueRequest::new(
            proposal.height,
            proposal.phase,
            proposal.sender,
            &proposal.value,
        );
        let validity = match self.app.validate_value(request) {
            ValidateValueResponse::Valid => Validity::Valid,
            ValidateValueResponse::Invalid => Validity::Invalid,
            ValidateValueResponse::NeedsWaiting => {
                self.pending_validations.insert(
                    (proposal.height, proposal.phase),
                    PendingValidation {
                        proposal,
                        retry_at: Instant::now() + self.config.validation_retry_interval,
                    },
                );
                return;
            }
        };

        let Proposal {
            sender,
            height,
            phase,
            value,
            source_phase,
            signature,
        } = proposal;
        self.record_proposal(
            height,
            phase,
            RecordedProposal::new(sender, value, source_phase, validity, signature),
        );
    }

    fn on_receive_prevote(&mut self, prevote: Prevote) {
        let tally = self.store.tally_mut(prevote.height, prevote.phase);
        if tally.has_prevoted(&prevote.sender) {
            return;
        }
        tally.note_sender(prevote.sender);

        if prevote.value_id.is_some() && tally.proposal().is_none() {
            let key = DeferredKey::new(MessageKind::Prevote, prevote.sender);
            tally.defer(key, GossipMessage::Prevote(prevote));
            return;
        }

        if tally.add_prevote(prevote.sender, prevote.value_id) {
            Event::ReceivePrevote(ReceivePrevoteEvent {
                timestamp: SystemTime::now(),
                origin: prevote.sender,
                prevote,
            })
            .publish(&self.event_publisher);
        }
    }

    fn on_receive_precommit(&mut self, precommit: Precommit) {
        if let Some(value_id) = &precommit.value_id {
            let signed = precommit.signature.is_some_and(|signature| {
                is_coordinator_signature(&precommit.sender, value_id, &signature)
            });
            if !signed {
                log::debug!(
                    "Dropping precommit from {:?} without a valid signature",
                    precommit.sender
                );
                return;
            }
        }

        let tally = self.store.tally_mut(precommit.height, precommit.phase);
        if tally.has_precommitted(&precommit.sender) {
            return;
        }
        tally.note_sender(precommit.sender);

        if precommit.value_id.is_some() && tally.proposal().is_none() {
            let key = DeferredKey::new(MessageKind::Precommit, precommit.sender);
            tally.defer(key, GossipMessage::Precommit(precommit));
            return;
        }

        let signature = precommit.value_id.and(precommit.signature);
        if tally.add_precommit(precommit.sender, precommit.value_id, signature) {
            Event::ReceivePrecommit(ReceivePrecommitEvent {
                timestamp: SystemTime::now(),
                origin: precommit.sender,
                precommit,
            })
            .publish(&self.event_publisher);
        }
    }
}
