/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! In-memory store of everything the consensus core knows about recent heights.
//!
//! The store is an arena of [`HeightEntry`]s keyed by [`Height`], each owning one [`VoteTally`] per
//! [`Phase`] it has seen messages for. Entries are created lazily, either when the local coordinator
//! starts a height or when the first message for it arrives, and are purged by
//! [`reap`](HeightPhaseStore::reap) once they fall more than `retained_heights` behind the current
//! height.
//!
//! ## Tallying
//!
//! Each tally accepts at most one prevote and one precommit per address. Whether a vote *approves* or
//! *opposes* is decided once, when it is tallied:
//! - A vote approves iff its value ID equals the ID of the phase's recorded proposal *and* that proposal
//!   was recorded as [`Valid`](Validity::Valid).
//! - Every other vote, including every nil vote, opposes.
//!
//! Because of this, non-nil votes that arrive before the proposal they vote for cannot be tallied
//! yet. They are parked in the tally's deferred buffer, keyed by [`DeferredKey`], and replayed once the
//! proposal is recorded.

use std::collections::{BTreeMap, HashSet};

use crate::{
    messages::{GossipMessage, MessageKind},
    types::{
        committee::Committee,
        data_types::{Address, EpochRound, Height, Phase, SignatureBytes, Validity, Value, ValueId},
    },
};

pub(crate) struct HeightPhaseStore {
    heights: BTreeMap<Height, HeightEntry>,
}

impl HeightPhaseStore {
    pub(crate) fn new() -> Self {
        Self {
            heights: BTreeMap::new(),
        }
    }

    pub(crate) fn get(&self, height: Height) -> Option<&HeightEntry> {
        self.heights.get(&height)
    }

    /// Get the entry of `height`, creating an empty one if none exists.
    pub(crate) fn entry(&mut self, height: Height) -> &mut HeightEntry {
        self.heights.entry(height).or_insert_with(HeightEntry::new)
    }

    /// Get the tally of `phase` at `height`, if any message for it has been seen.
    pub(crate) fn tally(&self, height: Height, phase: Phase) -> Option<&VoteTally> {
        self.heights
            .get(&height)
            .and_then(|entry| entry.phases.get(&phase))
    }

    /// Get the tally of `phase` at `height`, creating the height entry and the tally if necessary.
    pub(crate) fn tally_mut(&mut self, height: Height, phase: Phase) -> &mut VoteTally {
        self.entry(height).tally_mut(phase)
    }

    /// Get the committee cached for `height`, if it has been resolved.
    pub(crate) fn committee(&self, height: Height) -> Option<&ResolvedCommittee> {
        self.heights
            .get(&height)
            .and_then(|entry| entry.committee.as_ref())
    }

    /// Purge every entry more than `retained_heights` heights behind `current_height`. Returns the
    /// heights that were purged, in ascending order.
    pub(crate) fn reap(&mut self, current_height: Height, retained_heights: u64) -> Vec<Height> {
        let horizon = current_height.saturating_sub(retained_heights);
        let retained = self.heights.split_off(&horizon);
        let reaped = std::mem::replace(&mut self.heights, retained);
        reaped.into_keys().collect()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.heights.len()
    }
}

/// Committee of a height together with the epoch round it was resolved for.
#[derive(Clone)]
pub(crate) struct ResolvedCommittee {
    pub(crate) epoch_round: EpochRound,
    pub(crate) committee: Committee,
}

pub(crate) struct HeightEntry {
    committee: Option<ResolvedCommittee>,
    phases: BTreeMap<Phase, VoteTally>,
    decision: Option<Decision>,
}

impl HeightEntry {
    fn new() -> Self {
        Self {
            committee: None,
            phases: BTreeMap::new(),
            decision: None,
        }
    }

    pub(crate) fn committee(&self) -> Option<&ResolvedCommittee> {
        self.committee.as_ref()
    }

    /// Cache the committee of this height. The first committee cached is kept for the lifetime of the
    /// entry; later calls are no-ops.
    pub(crate) fn set_committee(&mut self, committee: ResolvedCommittee) {
        if self.committee.is_none() {
            self.committee = Some(committee);
        }
    }

    pub(crate) fn tally_mut(&mut self, phase: Phase) -> &mut VoteTally {
        self.phases.entry(phase).or_insert_with(VoteTally::new)
    }

    /// Iterate through the tallies of this height in ascending order of phase.
    pub(crate) fn tallies(&self) -> impl DoubleEndedIterator<Item = (&Phase, &VoteTally)> {
        self.phases.iter()
    }

    /// Iterate through the tallies of this height mutably, in ascending order of phase.
    pub(crate) fn tallies_mut(&mut self) -> impl Iterator<Item = (&Phase, &mut VoteTally)> {
        self.phases.iter_mut()
    }

    /// Get the number of messages parked across every tally of this height.
    pub(crate) fn deferred_len(&self) -> usize {
        self.phases.values().map(VoteTally::deferred_len).sum()
    }

    pub(crate) fn decision(&self) -> Option<&Decision> {
        self.decision.as_ref()
    }

    pub(crate) fn set_decision(&mut self, decision: Decision) {
        self.decision = Some(decision);
    }

    pub(crate) fn clear_decision(&mut self) {
        self.decision = None;
    }
}

/// A proposal as recorded in a tally, after its value has been validated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct RecordedProposal {
    pub(crate) proposer: Address,
    pub(crate) value_id: ValueId,
    pub(crate) value: Value,
    pub(crate) source_phase: Option<Phase>,
    pub(crate) validity: Validity,
    pub(crate) signature: SignatureBytes,
}

impl RecordedProposal {
    pub(crate) fn new(
        proposer: Address,
        value: Value,
        source_phase: Option<Phase>,
        validity: Validity,
        signature: SignatureBytes,
    ) -> Self {
        Self {
            proposer,
            value_id: value.id(),
            value,
            source_phase,
            validity,
            signature,
        }
    }

    pub(crate) fn is_valid(&self) -> bool {
        self.validity.is_valid()
    }
}

/// The proposal that a height decided on, and the phase it was decided in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Decision {
    pub(crate) phase: Phase,
    pub(crate) proposal: RecordedProposal,
}

/// Key of a message parked in a [`VoteTally`]'s deferred buffer. A tally defers at most one message per
/// kind per sender.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct DeferredKey {
    pub(crate) kind: MessageKind,
    pub(crate) sender: Address,
}

impl DeferredKey {
    pub(crate) fn new(kind: MessageKind, sender: Address) -> Self {
        Self { kind, sender }
    }
}

/// Everything known about a single `(height, phase)`.
pub(crate) struct VoteTally {
    proposal: Option<RecordedProposal>,
    prevote_approve: HashSet<Address>,
    prevote_oppose: HashSet<Address>,
    precommit_approve: BTreeMap<Address, SignatureBytes>,
    precommit_oppose: HashSet<Address>,
    deferred: BTreeMap<DeferredKey, GossipMessage>,
    senders: HashSet<Address>,
}

impl VoteTally {
    pub(crate) fn new() -> Self {
        Self {
            proposal: None,
            prevote_approve: HashSet::new(),
            prevote_oppose: HashSet::new(),
            precommit_approve: BTreeMap::new(),
            precommit_oppose: HashSet::new(),
            deferred: BTreeMap::new(),
            senders: HashSet::new(),
        }
    }

    pub(crate) fn proposal(&self) -> Option<&RecordedProposal> {
        self.proposal.as_ref()
    }

    /// Record the proposal of this phase. Returns `false`, leaving the tally unchanged, if a proposal was
    /// already recorded.
    pub(crate) fn set_proposal(&mut self, proposal: RecordedProposal) -> bool {
        if self.proposal.is_some() {
            return false;
        }
        self.proposal = Some(proposal);
        true
    }

    pub(crate) fn has_prevoted(&self, voter: &Address) -> bool {
        self.prevote_approve.contains(voter) || self.prevote_oppose.contains(voter)
    }

    pub(crate) fn has_precommitted(&self, voter: &Address) -> bool {
        self.precommit_approve.contains_key(voter) || self.precommit_oppose.contains(voter)
    }

    /// Tally a prevote by `voter`. Returns `false` if `voter` has already prevoted in this phase.
    pub(crate) fn add_prevote(&mut self, voter: Address, value_id: Option<ValueId>) -> bool {
        if self.has_prevoted(&voter) {
            return false;
        }

        if self.approves(value_id) {
            self.prevote_approve.insert(voter);
        } else {
            self.prevote_oppose.insert(voter);
        }
        true
    }

    /// Tally a precommit by `voter`. Returns `false` if `voter` has already precommitted in this phase.
    ///
    /// Approving precommits must carry the voter's signature over the value ID, which becomes part of
    /// the quorum certificate if the value is decided.
    pub(crate) fn add_precommit(
        &mut self,
        voter: Address,
        value_id: Option<ValueId>,
        signature: Option<SignatureBytes>,
    ) -> bool {
        if self.has_precommitted(&voter) {
            return false;
        }

        match signature {
            Some(signature) if self.approves(value_id) => {
                self.precommit_approve.insert(voter, signature);
            }
            _ => {
                self.precommit_oppose.insert(voter);
            }
        }
        true
    }

    fn approves(&self, value_id: Option<ValueId>) -> bool {
        match (&self.proposal, value_id) {
            (Some(proposal), Some(value_id)) => proposal.is_valid() && proposal.value_id == value_id,
            _ => false,
        }
    }

    pub(crate) fn approving_prevotes(&self) -> usize {
        self.prevote_approve.len()
    }

    pub(crate) fn opposing_prevotes(&self) -> usize {
        self.prevote_oppose.len()
    }

    pub(crate) fn total_prevotes(&self) -> usize {
        self.prevote_approve.len() + self.prevote_oppose.len()
    }

    pub(crate) fn approving_precommits(&self) -> usize {
        self.precommit_approve.len()
    }

    pub(crate) fn total_precommits(&self) -> usize {
        self.precommit_approve.len() + self.precommit_oppose.len()
    }

    /// Get the signatures of every approving precommit, in ascending order of voter address.
    pub(crate) fn precommit_signatures(&self) -> Vec<(Address, SignatureBytes)> {
        self.precommit_approve
            .iter()
            .map(|(voter, signature)| (*voter, *signature))
            .collect()
    }

    /// Park `message` until the proposal of this phase is recorded. Returns `false` if a message of the
    /// same kind from the same sender is already parked, in which case the earlier one is kept.
    pub(crate) fn defer(&mut self, key: DeferredKey, message: GossipMessage) -> bool {
        if self.deferred.contains_key(&key) {
            return false;
        }
        self.deferred.insert(key, message);
        true
    }

    /// Remove and return every parked message.
    pub(crate) fn take_deferred(&mut self) -> Vec<GossipMessage> {
        std::mem::take(&mut self.deferred).into_values().collect()
    }

    pub(crate) fn deferred_len(&self) -> usize {
        self.deferred.len()
    }

    pub(crate) fn has_deferred(&self) -> bool {
        !self.deferred.is_empty()
    }

    /// Count the distinct senders of parked prevotes for `value_id`.
    pub(crate) fn deferred_prevotes_for(&self, value_id: &ValueId) -> usize {
        self.deferred
            .values()
            .filter(|message| match message {
                GossipMessage::Prevote(prevote) => prevote.value_id.as_ref() == Some(value_id),
                _ => false,
            })
            .count()
    }

    /// Note that `sender` sent an accepted message for this phase.
    pub(crate) fn note_sender(&mut self, sender: Address) {
        self.senders.insert(sender);
    }

    /// Get the number of distinct coordinators that sent accepted messages for this phase.
    pub(crate) fn distinct_senders(&self) -> usize {
        self.senders.len()
    }
}
