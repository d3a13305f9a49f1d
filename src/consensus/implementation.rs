/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Event-driven implementation of the consensus state machine.
//!
//! Main type: [`Consensus`].

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::mpsc::Sender,
    time::{Instant, SystemTime},
};

use crate::{
    app::{
        App, CommitteeResolution, Committees, ComposeCandidateRequest, ValidateValueRequest,
        ValidateValueResponse,
    },
    events::{
        Event, FinalizeEvent, HaltEvent, PhaseTimeoutEvent, PrecommitEvent, PrevoteEvent,
        ProposeEvent, ReapHeightsEvent, StartPhaseEvent,
    },
    finalizer::{FinalizeOutcome, FinalizeRequest},
    messages::{Precommit, Prevote, Proposal},
    networking::{Network, SenderHandle},
    store::{Decision, HeightPhaseStore, RecordedProposal, ResolvedCommittee},
    timeout::{ArmedTimeout, TimeoutKind, TimeoutScheduler},
    types::{
        certificates::QuorumCertificate,
        data_types::{Address, EpochRound, Height, Phase, Step, Validity, Value, ValueId},
    },
};

use super::{ConsensusConfiguration, ConsensusError, Misconfiguration};

/// A single coordinator's view of the consensus protocol.
///
/// # Usage
///
/// `Consensus` is meant to be driven by a single thread (the [algorithm thread](crate::algorithm)) in
/// an event-oriented fashion. Its crate-public methods are handlers for the things that can happen to
/// a coordinator:
/// 1. [`start_phase`](Self::start_phase): enter a phase, either initially or after a timeout.
/// 2. [`on_receive_gossip`](Self::on_receive_gossip): a message was gossiped by another coordinator.
/// 3. [`tick`](Self::tick): time passed; fire expired timeouts and retries, and reap old heights.
/// 4. [`on_height_committed`](Self::on_height_committed): the ledger committed a height.
/// 5. [`on_finalize_outcome`](Self::on_finalize_outcome): the finalizer finished a request.
///
/// Every handler re-runs the [decision rules](super::decision) before returning.
pub(crate) struct Consensus<N: Network, A: App, C: Committees> {
    pub(super) config: ConsensusConfiguration,
    pub(super) app: A,
    pub(super) committees: C,
    pub(super) sender: SenderHandle<N>,
    pub(super) store: HeightPhaseStore,
    pub(super) timeouts: TimeoutScheduler,
    pub(super) state: ValidatorState,
    pub(super) pending_validations: BTreeMap<(Height, Phase), PendingValidation>,
    pub(super) committee_retry: Option<CommitteeRetry>,
    pub(super) finalizer: Sender<FinalizeRequest>,
    pub(super) finalization_in_flight: Option<Height>,
    pub(super) finalized: Option<Height>,
    pub(super) announced_decision: Option<(Height, Phase)>,
    pub(super) failed_finalizations: BTreeSet<Phase>,
    pub(super) prevote_timeout_armed_for: Option<(Height, Phase)>,
    pub(super) precommit_timeout_armed_for: Option<(Height, Phase)>,
    pub(super) halted_at: Option<Height>,
    pub(super) next_reap: Instant,
    pub(super) event_publisher: Option<Sender<Event>>,
}

/// The mutable variables of the protocol.
///
/// # Invariants
///
/// Within a height, `locked.phase <= valid.phase <= phase` whenever the respective values are set, and
/// `phase` never decreases.
pub(crate) struct ValidatorState {
    pub(crate) started: bool,
    pub(crate) height: Height,
    pub(crate) phase: Phase,
    pub(crate) step: Step,
    pub(crate) locked: Option<LockedValue>,
    pub(crate) valid: Option<ValidValue>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct LockedValue {
    pub(crate) value_id: ValueId,
    pub(crate) phase: Phase,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct ValidValue {
    pub(crate) value: Value,
    pub(crate) value_id: ValueId,
    pub(crate) phase: Phase,
}

/// A proposal whose value the app could not judge yet.
pub(crate) struct PendingValidation {
    pub(crate) proposal: Proposal,
    pub(crate) retry_at: Instant,
}

#[derive(Clone, Copy)]
pub(crate) struct CommitteeRetry {
    height: Height,
    attempt: u32,
    retry_at: Instant,
}

impl<N: Network, A: App, C: Committees> Consensus<N, A, C> {
    pub(crate) fn new(
        config: ConsensusConfiguration,
        network: N,
        app: A,
        committees: C,
        finalizer: Sender<FinalizeRequest>,
        event_publisher: Option<Sender<Event>>,
    ) -> Self {
        let timeouts = TimeoutScheduler::new(config.gst, config.delta);
        let next_reap = Instant::now() + config.reap_interval;
        Self {
            config,
            app,
            committees,
            sender: SenderHandle::new(network),
            store: HeightPhaseStore::new(),
            timeouts,
            state: ValidatorState {
                started: false,
                height: Height::new(0),
                phase: Phase::init(),
                step: Step::Propose,
                locked: None,
                valid: None,
            },
            pending_validations: BTreeMap::new(),
            committee_retry: None,
            finalizer,
            finalization_in_flight: None,
            finalized: None,
            announced_decision: None,
            failed_finalizations: BTreeSet::new(),
            prevote_timeout_armed_for: None,
            precommit_timeout_armed_for: None,
            halted_at: None,
            next_reap,
            event_publisher,
        }
    }

    pub(crate) fn me(&self) -> Address {
        self.config.keypair.address()
    }

    pub(crate) fn height(&self) -> Height {
        self.state.height
    }

    pub(crate) fn phase(&self) -> Phase {
        self.state.phase
    }

    pub(crate) fn step(&self) -> Step {
        self.state.step
    }

    pub(crate) fn locked(&self) -> Option<&LockedValue> {
        self.state.locked.as_ref()
    }

    pub(crate) fn valid(&self) -> Option<&ValidValue> {
        self.state.valid.as_ref()
    }

    pub(crate) fn decision(&self, height: Height) -> Option<&Decision> {
        self.store.get(height).and_then(|entry| entry.decision())
    }

    /// Whether progress on the current height is halted because of a misconfiguration.
    pub(crate) fn is_halted(&self) -> bool {
        self.halted_at == Some(self.state.height)
    }

    /// Enter `phase` of `height`.
    ///
    /// This is a no-op if the validator has already started and `(height, phase)` is not strictly after
    /// its current `(height, phase)`.
    pub(crate) fn start_phase(&mut self, height: Height, phase: Phase) -> Result<(), ConsensusError> {
        if self.state.started
            && (height < self.state.height
                || (height == self.state.height && phase <= self.state.phase))
        {
            return Ok(());
        }
        if self.halted_at == Some(height) {
            return Ok(());
        }

        self.state.started = true;
        self.state.height = height;
        self.state.phase = phase;
        self.state.step = Step::Propose;
        self.committee_retry = None;

        self.enter_phase(0)
    }

    /// Resolve the committee of the current height, then either propose or wait for the proposal.
    /// `committee_attempt` counts how many times resolving the committee has been retried.
    fn enter_phase(&mut self, committee_attempt: u32) -> Result<(), ConsensusError> {
        let (height, phase) = (self.state.height, self.state.phase);

        let (resolved, newly_resolved) = match self.resolve_committee(height)? {
            Some(resolved) => resolved,
            None => {
                self.schedule_committee_retry(height, committee_attempt);
                return Ok(());
            }
        };
        let Some(proposer) =
            resolved
                .committee
                .proposer_at(height, phase, self.config.proposer_offset)
        else {
            return Ok(());
        };

        Event::StartPhase(StartPhaseEvent {
            timestamp: SystemTime::now(),
            height,
            phase,
            proposer,
        })
        .publish(&self.event_publisher);

        if proposer == self.me() {
            self.propose(resolved.epoch_round);
        } else {
            self.store.entry(height).clear_decision();
            self.arm_timeout(TimeoutKind::Propose);
        }

        // Messages for this height that arrived before its committee was known.
        if newly_resolved {
            self.replay_height(height);
        }

        self.evaluate()
    }

    /// Get the committee of `height`, resolving and caching it if necessary. Returns whether the
    /// committee was newly resolved alongside it, or `None` if it is not yet determinable.
    fn resolve_committee(
        &mut self,
        height: Height,
    ) -> Result<Option<(ResolvedCommittee, bool)>, ConsensusError> {
        if let Some(resolved) = self.store.committee(height) {
            return Ok(Some((resolved.clone(), false)));
        }

        match self.committees.resolve_committee(height) {
            CommitteeResolution::NotYetDeterminable => Ok(None),
            CommitteeResolution::Resolved {
                epoch_round,
                committee,
            } => {
                if committee.len() != self.config.committee_size {
                    let reason = Misconfiguration::CommitteeSizeMismatch {
                        expected: self.config.committee_size,
                        actual: committee.len(),
                    };
                    return Err(self.halt(height, reason));
                }
                if !committee.contains(&self.me()) {
                    return Err(self.halt(height, Misconfiguration::NotACommitteeMember));
                }

                let resolved = ResolvedCommittee {
                    epoch_round,
                    committee,
                };
                self.store.entry(height).set_committee(resolved.clone());
                Ok(Some((resolved, true)))
            }
        }
    }

    fn schedule_committee_retry(&mut self, height: Height, attempt: u32) {
        let backoff = self
            .config
            .committee_retry_base
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.config.committee_retry_max);
        log::debug!(
            "Committee of height {} is not yet determinable, retrying in {} ms",
            height,
            backoff.as_millis()
        );
        self.committee_retry = Some(CommitteeRetry {
            height,
            attempt,
            retry_at: Instant::now() + backoff,
        });
    }

    fn halt(&mut self, height: Height, reason: Misconfiguration) -> ConsensusError {
        log::error!("Halting progress on height {}: {:?}", height, reason);
        self.halted_at = Some(height);
        self.committee_retry = None;
        self.timeouts.cancel();

        Event::Halt(HaltEvent {
            timestamp: SystemTime::now(),
            height,
            reason: reason.clone(),
        })
        .publish(&self.event_publisher);

        ConsensusError::Misconfiguration { height, reason }
    }

    /// Propose the valid value if there is one, otherwise compose, validate, and propose a new
    /// candidate. Any local failure makes this coordinator a failed proposer for the phase.
    fn propose(&mut self, epoch_round: EpochRound) {
        let (height, phase) = (self.state.height, self.state.phase);
        let me = self.me();

        let (value, source_phase) = match &self.state.valid {
            Some(valid) => (valid.value.clone(), Some(valid.phase)),
            None => {
                let request = ComposeCandidateRequest::new(height, phase, epoch_round);
                let value = match self
                    .app
                    .compose_candidate_value(request, &self.config.keypair)
                {
                    Ok(value) => value,
                    Err(err) => {
                        log::warn!(
                            "Failed to compose a candidate for height {}, phase {}: {:?}",
                            height,
                            phase,
                            err
                        );
                        self.arm_timeout(TimeoutKind::Propose);
                        return;
                    }
                };

                let request = ValidateValueRequest::new(height, phase, me, &value);
                match self.app.validate_value(request) {
                    ValidateValueResponse::Valid => (),
                    response => {
                        log::warn!(
                            "Own candidate for height {}, phase {} failed validation: {:?}",
                            height,
                            phase,
                            response
                        );
                        self.arm_timeout(TimeoutKind::Propose);
                        return;
                    }
                }

                (value, None)
            }
        };

        let proposal = Proposal::new(&self.config.keypair, height, phase, value, source_phase);
        let value_id = proposal.value.id();
        self.record_proposal(
            height,
            phase,
            RecordedProposal::new(
                me,
                proposal.value.clone(),
                source_phase,
                Validity::Valid,
                proposal.signature,
            ),
        );

        self.sender.broadcast(proposal.clone());
        Event::Propose(ProposeEvent {
            timestamp: SystemTime::now(),
            proposal,
        })
        .publish(&self.event_publisher);

        self.cast_prevote(Some(value_id));
        self.state.step = Step::Prevote;
    }

    /// Record `proposal` as the proposal of `(height, phase)`, then replay the votes that were waiting
    /// for it.
    pub(super) fn record_proposal(
        &mut self,
        height: Height,
        phase: Phase,
        proposal: RecordedProposal,
    ) {
        let tally = self.store.tally_mut(height, phase);
        if !tally.set_proposal(proposal) {
            return;
        }
        for message in tally.take_deferred() {
            self.route(message);
        }
    }

    /// Re-route every message deferred at `height`.
    fn replay_height(&mut self, height: Height) {
        let deferred: Vec<_> = self
            .store
            .entry(height)
            .tallies_mut()
            .flat_map(|(_, tally)| tally.take_deferred())
            .collect();
        for message in deferred {
            self.route(message);
        }
    }

    /// Tally and broadcast a prevote by this coordinator in the current phase.
    pub(super) fn cast_prevote(&mut self, value_id: Option<ValueId>) {
        let (height, phase) = (self.state.height, self.state.phase);
        let prevote = Prevote::new(&self.config.keypair, height, phase, value_id);
        self.store
            .tally_mut(height, phase)
            .add_prevote(prevote.sender, value_id);

        self.sender.broadcast(prevote.clone());
        Event::Prevote(PrevoteEvent {
            timestamp: SystemTime::now(),
            prevote,
        })
        .publish(&self.event_publisher);
    }

    /// Tally and broadcast a precommit by this coordinator in the current phase.
    pub(super) fn cast_precommit(&mut self, value_id: Option<ValueId>) {
        let (height, phase) = (self.state.height, self.state.phase);
        let precommit = Precommit::new(&self.config.keypair, height, phase, value_id);
        self.store.tally_mut(height, phase).add_precommit(
            precommit.sender,
            value_id,
            precommit.signature,
        );

        self.sender.broadcast(precommit.clone());
        Event::Precommit(PrecommitEvent {
            timestamp: SystemTime::now(),
            precommit,
        })
        .publish(&self.event_publisher);
    }

    pub(super) fn arm_timeout(&mut self, kind: TimeoutKind) {
        let armed = self.timeouts.arm(
            kind,
            self.state.height,
            self.state.phase,
            Instant::now(),
        );
        log::debug!(
            "Armed {:?} timeout for height {}, phase {}: {} ms",
            kind,
            armed.height,
            armed.phase,
            armed.duration.as_millis()
        );
    }

    /// Act on a timeout that expired. Timeouts armed for a `(height, phase)` or step that the validator
    /// has since left are no-ops.
    pub(crate) fn on_timeout(&mut self, armed: ArmedTimeout) -> Result<(), ConsensusError> {
        Event::PhaseTimeout(PhaseTimeoutEvent {
            timestamp: SystemTime::now(),
            height: armed.height,
            phase: armed.phase,
            kind: armed.kind,
            timeout: armed.duration,
        })
        .publish(&self.event_publisher);

        if !self.state.started || self.is_halted() {
            return Ok(());
        }
        let current = armed.height == self.state.height && armed.phase == self.state.phase;

        match armed.kind {
            TimeoutKind::Propose if current && self.state.step == Step::Propose => {
                self.cast_prevote(None);
                self.state.step = Step::Prevote;
                self.evaluate()
            }
            TimeoutKind::Prevote if current && self.state.step == Step::Prevote => {
                self.cast_precommit(None);
                self.state.step = Step::Precommit;
                self.evaluate()
            }
            TimeoutKind::Precommit if current => {
                self.start_phase(armed.height, armed.phase + 1)
            }
            _ => Ok(()),
        }
    }

    /// Fire the expired timeout, committee retry, and validation retries as of `now`, and reap old
    /// heights when the reap interval has passed.
    pub(crate) fn tick(&mut self, now: Instant) -> Result<(), ConsensusError> {
        if let Some(armed) = self.timeouts.poll_expired(now) {
            self.on_timeout(armed)?;
        }

        if let Some(retry) = self.committee_retry {
            if retry.retry_at <= now {
                self.committee_retry = None;
                if retry.height == self.state.height && !self.is_halted() {
                    self.enter_phase(retry.attempt.saturating_add(1))?;
                }
            }
        }

        self.retry_validations(now)?;

        if now >= self.next_reap {
            self.reap();
            self.next_reap = now + self.config.reap_interval;
        }

        Ok(())
    }

    fn retry_validations(&mut self, now: Instant) -> Result<(), ConsensusError> {
        let due: Vec<(Height, Phase)> = self
            .pending_validations
            .iter()
            .filter(|(_, pending)| pending.retry_at <= now)
            .map(|(key, _)| *key)
            .collect();
        if due.is_empty() {
            return Ok(());
        }

        for key in due {
            if let Some(pending) = self.pending_validations.remove(&key) {
                if key.0 == self.state.height {
                    self.validate_proposal(pending.proposal);
                }
            }
        }

        self.evaluate()
    }

    fn reap(&mut self) {
        let current_height = self.state.height;
        let reaped = self
            .store
            .reap(current_height, self.config.retained_heights);
        self.pending_validations
            .retain(|(height, _), _| *height >= current_height);

        if !reaped.is_empty() {
            Event::ReapHeights(ReapHeightsEvent {
                timestamp: SystemTime::now(),
                heights: reaped,
            })
            .publish(&self.event_publisher);
        }
    }

    /// The ledger committed `height`: forget the locks and timers of the height and start the next one.
    /// Notifications for heights that the validator has already moved past are ignored.
    pub(crate) fn on_height_committed(&mut self, height: Height) -> Result<(), ConsensusError> {
        if self.state.started && height + 1 <= self.state.height {
            return Ok(());
        }

        self.state.locked = None;
        self.state.valid = None;
        self.prevote_timeout_armed_for = None;
        self.precommit_timeout_armed_for = None;
        self.timeouts.cancel();
        self.halted_at = None;
        self.committee_retry = None;
        self.failed_finalizations.clear();
        self.pending_validations
            .retain(|(pending_height, _), _| *pending_height > height);
        if self.finalization_in_flight.is_some_and(|in_flight| in_flight <= height) {
            self.finalization_in_flight = None;
        }
        if self.finalized.is_some_and(|finalized| finalized <= height) {
            self.finalized = None;
        }
        self.announced_decision = None;

        self.start_phase(height + 1, Phase::init())
    }

    /// Hand a decided value proposed by this coordinator to the finalizer, unless a finalization for
    /// `height` is already in flight or has already succeeded.
    pub(super) fn finalize(&mut self, height: Height, decision: &Decision) {
        if self.finalization_in_flight == Some(height) || self.finalized == Some(height) {
            return;
        }

        let Some(tally) = self.store.tally(height, decision.phase) else {
            return;
        };
        let request = FinalizeRequest {
            height,
            phase: decision.phase,
            value: decision.proposal.value.clone(),
            certificate: QuorumCertificate {
                height,
                phase: decision.phase,
                value_id: decision.proposal.value_id,
                signatures: tally.precommit_signatures(),
            },
        };

        match self.finalizer.send(request) {
            Ok(()) => self.finalization_in_flight = Some(height),
            Err(_) => log::error!("Finalizer is not running, cannot finalize height {}", height),
        }
    }

    /// Act on the outcome of a finalization. Outcomes for any height other than the current one are
    /// stale and discarded.
    pub(crate) fn on_finalize_outcome(
        &mut self,
        outcome: FinalizeOutcome,
    ) -> Result<(), ConsensusError> {
        if self.finalization_in_flight == Some(outcome.height) {
            self.finalization_in_flight = None;
        }
        if !self.state.started || outcome.height != self.state.height {
            log::debug!(
                "Discarding stale finalization outcome for height {}",
                outcome.height
            );
            return Ok(());
        }

        Event::Finalize(FinalizeEvent {
            timestamp: SystemTime::now(),
            height: outcome.height,
            phase: outcome.phase,
            succeeded: outcome.result.is_ok(),
        })
        .publish(&self.event_publisher);

        match outcome.result {
            Ok(()) => {
                self.finalized = Some(outcome.height);
                Ok(())
            }
            Err(err) => {
                log::warn!(
                    "Finalization of height {}, phase {} failed: {:?}",
                    outcome.height,
                    outcome.phase,
                    err
                );
                // Decisions at this phase are no longer finalized by this coordinator.
                self.failed_finalizations.insert(outcome.phase);
                self.store.entry(outcome.height).clear_decision();
                if self.state.phase == outcome.phase {
                    self.start_phase(outcome.height, outcome.phase + 1)
                } else {
                    Ok(())
                }
            }
        }
    }
}
