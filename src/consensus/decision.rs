/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The decision rules of the consensus protocol.
//!
//! [`evaluate`](Consensus::evaluate) applies every rule against the current height and phase, and
//! repeats until a full pass changes nothing. With `N` coordinators, `f = (N - 1) / 3` and a quorum is
//! `2f + 1`:
//!
//! | Rule | Step | Condition | Action |
//! |------|------|-----------|--------|
//! | Prevote on fresh proposal | Propose | Proposal without source phase | Prevote it if valid and not conflicting with the lock, nil otherwise |
//! | Prevote on re-proposal | Propose | Proposal with source phase `vr < phase` and a prevote quorum for it at `vr` | Prevote it if valid and the lock is not later than `vr` or is on the same value, nil otherwise |
//! | Arm prevote timeout | Prevote | Quorum of prevotes of any kind, first time | Arm the prevote timeout |
//! | Lock | Prevote, Precommit | Quorum of approving prevotes | Lock and precommit (Prevote step only), update the valid value |
//! | Precommit nil | Prevote | Quorum of opposing prevotes | Precommit nil |
//! | Arm precommit timeout | Any | Quorum of precommits of any kind, first time | Arm the precommit timeout |
//! | Decide | Any | First phase with a quorum of approving precommits | Record the decision, finalize if own proposal |
//! | Fast-forward | Any | Later phase with `f + 1` distinct senders | Start that phase |

use std::time::SystemTime;

use crate::{
    app::{App, Committees},
    events::{
        DecideEvent, Event, FastForwardEvent, UpdateLockedValueEvent, UpdateValidValueEvent,
    },
    networking::Network,
    store::Decision,
    timeout::TimeoutKind,
    types::{
        committee::{fast_forward_threshold, quorum},
        data_types::{Height, Phase, Step, ValueId},
    },
};

use super::{
    implementation::{Consensus, LockedValue, ValidValue},
    ConsensusError,
};

impl<N: Network, A: App, C: Committees> Consensus<N, A, C> {
    /// Apply the decision rules until none of them changes the state.
    pub(crate) fn evaluate(&mut self) -> Result<(), ConsensusError> {
        if !self.state.started || self.is_halted() {
            return Ok(());
        }

        loop {
            // Every rule runs in every pass.
            let changed = self.try_prevote_on_proposal()
                | self.try_arm_prevote_timeout()
                | self.try_precommit_on_prevote_quorum()
                | self.try_precommit_nil_on_opposition()
                | self.try_arm_precommit_timeout()
                | self.try_decide();

            // Starting a later phase re-evaluates on its own.
            if self.try_fast_forward()? || !changed {
                return Ok(());
            }
        }
    }

    fn quorum(&self) -> usize {
        quorum(self.config.committee_size)
    }

    fn try_prevote_on_proposal(&mut self) -> bool {
        if self.state.step != Step::Propose {
            return false;
        }
        let (height, phase) = (self.state.height, self.state.phase);
        let Some(proposal) = self
            .store
            .tally(height, phase)
            .and_then(|tally| tally.proposal())
        else {
            return false;
        };
        let (value_id, is_valid, source_phase) =
            (proposal.value_id, proposal.is_valid(), proposal.source_phase);

        let approve = match source_phase {
            None => {
                is_valid
                    && self
                        .state
                        .locked
                        .as_ref()
                        .map_or(true, |locked| locked.value_id == value_id)
            }
            Some(source_phase) => {
                if source_phase >= phase
                    || self.prevote_support(height, source_phase, &value_id) < self.quorum()
                {
                    return false;
                }
                is_valid
                    && self.state.locked.as_ref().map_or(true, |locked| {
                        locked.phase <= source_phase || locked.value_id == value_id
                    })
            }
        };

        self.cast_prevote(approve.then_some(value_id));
        self.state.step = Step::Prevote;
        true
    }

    /// Count the prevotes for `value_id` at `phase`, including those parked because the proposal of
    /// `phase` has not been received.
    fn prevote_support(&self, height: Height, phase: Phase, value_id: &ValueId) -> usize {
        let Some(tally) = self.store.tally(height, phase) else {
            return 0;
        };
        match tally.proposal() {
            Some(proposal) if proposal.value_id == *value_id => tally.approving_prevotes(),
            Some(_) => 0,
            None => tally.deferred_prevotes_for(value_id),
        }
    }

    fn try_arm_prevote_timeout(&mut self) -> bool {
        let current = (self.state.height, self.state.phase);
        if self.state.step != Step::Prevote
            || self.prevote_timeout_armed_for == Some(current)
            || self.precommit_timeout_armed_for == Some(current)
        {
            return false;
        }
        let total = self
            .store
            .tally(current.0, current.1)
            .map_or(0, |tally| tally.total_prevotes());
        if total < self.quorum() {
            return false;
        }

        self.arm_timeout(TimeoutKind::Prevote);
        self.prevote_timeout_armed_for = Some(current);
        true
    }

    fn try_precommit_on_prevote_quorum(&mut self) -> bool {
        if self.state.step == Step::Propose {
            return false;
        }
        let (height, phase) = (self.state.height, self.state.phase);
        let Some(tally) = self.store.tally(height, phase) else {
            return false;
        };
        let Some(proposal) = tally.proposal() else {
            return false;
        };
        if !proposal.is_valid() || tally.approving_prevotes() < self.quorum() {
            return false;
        }
        let (value, value_id) = (proposal.value.clone(), proposal.value_id);

        let mut changed = false;
        if self.state.step == Step::Prevote {
            self.state.locked = Some(LockedValue { value_id, phase });
            Event::UpdateLockedValue(UpdateLockedValueEvent {
                timestamp: SystemTime::now(),
                height,
                locked_phase: phase,
                value_id,
            })
            .publish(&self.event_publisher);

            self.cast_precommit(Some(value_id));
            self.state.step = Step::Precommit;
            changed = true;
        }

        let already_valid = self
            .state
            .valid
            .as_ref()
            .is_some_and(|valid| valid.value_id == value_id && valid.phase == phase);
        if !already_valid {
            self.state.valid = Some(ValidValue {
                value,
                value_id,
                phase,
            });
            Event::UpdateValidValue(UpdateValidValueEvent {
                timestamp: SystemTime::now(),
                height,
                valid_phase: phase,
                value_id,
            })
            .publish(&self.event_publisher);
            changed = true;
        }

        changed
    }

    fn try_precommit_nil_on_opposition(&mut self) -> bool {
        if self.state.step != Step::Prevote {
            return false;
        }
        let opposing = self
            .store
            .tally(self.state.height, self.state.phase)
            .map_or(0, |tally| tally.opposing_prevotes());
        if opposing < self.quorum() {
            return false;
        }

        self.cast_precommit(None);
        self.state.step = Step::Precommit;
        true
    }

    fn try_arm_precommit_timeout(&mut self) -> bool {
        let current = (self.state.height, self.state.phase);
        if self.precommit_timeout_armed_for == Some(current) {
            return false;
        }
        let total = self
            .store
            .tally(current.0, current.1)
            .map_or(0, |tally| tally.total_precommits());
        if total < self.quorum() {
            return false;
        }

        self.arm_timeout(TimeoutKind::Precommit);
        self.precommit_timeout_armed_for = Some(current);
        true
    }

    fn try_decide(&mut self) -> bool {
        let height = self.state.height;
        let quorum = self.quorum();
        let Some(entry) = self.store.get(height) else {
            return false;
        };
        if entry.decision().is_some() {
            return false;
        }

        let decision = entry.tallies().find_map(|(phase, tally)| {
            if self.failed_finalizations.contains(phase) {
                return None;
            }
            tally
                .proposal()
                .filter(|proposal| proposal.is_valid() && tally.approving_precommits() >= quorum)
                .map(|proposal| Decision {
                    phase: *phase,
                    proposal: proposal.clone(),
                })
        });
        let Some(decision) = decision else {
            return false;
        };

        // A decision found again after its slot was cleared is not announced twice.
        if self.announced_decision != Some((height, decision.phase)) {
            Event::Decide(DecideEvent {
                timestamp: SystemTime::now(),
                height,
                phase: decision.phase,
                proposer: decision.proposal.proposer,
                value_id: decision.proposal.value_id,
            })
            .publish(&self.event_publisher);
            self.announced_decision = Some((height, decision.phase));
        }

        if decision.proposal.proposer == self.me() {
            self.finalize(height, &decision);
        }
        self.store.entry(height).set_decision(decision);
        true
    }

    /// Start the latest phase of the current height that at least `f + 1` distinct coordinators have
    /// sent messages for, if it is later than the current phase. Returns whether it did.
    pub(super) fn try_fast_forward(&mut self) -> Result<bool, ConsensusError> {
        let (height, phase) = (self.state.height, self.state.phase);
        let threshold = fast_forward_threshold(self.config.committee_size);
        let target = self.store.get(height).and_then(|entry| {
            entry
                .tallies()
                .rev()
                .take_while(|(tally_phase, _)| **tally_phase > phase)
                .find(|(_, tally)| tally.distinct_senders() >= threshold)
                .map(|(tally_phase, _)| *tally_phase)
        });
        let Some(target) = target else {
            return Ok(false);
        };

        let result = self.start_phase(height, target);
        if self.state.height == height && self.state.phase == phase {
            result?;
            return Ok(false);
        }

        Event::FastForward(FastForwardEvent {
            timestamp: SystemTime::now(),
            height,
            from_phase: phase,
            to_phase: target,
        })
        .publish(&self.event_publisher);

        result?;
        Ok(true)
    }
}
