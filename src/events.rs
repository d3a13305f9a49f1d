/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions of the events that the consensus core emits, for event handling and logging.
//!
//! An event for a given action indicates that the action has been completed. Every event carries the
//! time it was emitted.
//!
//! Handlers for these events are registered on the [replica builder](crate::replica::ReplicaSpec) and
//! run on a dedicated event bus thread, so slow handlers never block consensus.

use std::{
    sync::mpsc::Sender,
    time::{Duration, SystemTime},
};

use crate::{
    consensus::Misconfiguration,
    messages::{Precommit, Prevote, Proposal},
    timeout::TimeoutKind,
    types::data_types::{Address, Height, Phase, ValueId},
};

pub enum Event {
    // Events that change the validator's state.
    StartPhase(StartPhaseEvent),
    UpdateLockedValue(UpdateLockedValueEvent),
    UpdateValidValue(UpdateValidValueEvent),
    Decide(DecideEvent),
    Finalize(FinalizeEvent),
    // Events that involve broadcasting a gossip message.
    Propose(ProposeEvent),
    Prevote(PrevoteEvent),
    Precommit(PrecommitEvent),
    // Events that involve receiving a gossip message.
    ReceiveProposal(ReceiveProposalEvent),
    ReceivePrevote(ReceivePrevoteEvent),
    ReceivePrecommit(ReceivePrecommitEvent),
    // Timer and housekeeping events.
    PhaseTimeout(PhaseTimeoutEvent),
    FastForward(FastForwardEvent),
    ReapHeights(ReapHeightsEvent),
    Halt(HaltEvent),
}

impl Event {
    /// Publish this event on `event_publisher`, if the replica has any event handlers.
    pub(crate) fn publish(self, event_publisher: &Option<Sender<Event>>) {
        if let Some(event_publisher) = event_publisher {
            // The event bus only hangs up during shutdown.
            let _ = event_publisher.send(self);
        }
    }
}

/// The validator entered `phase` of `height`.
pub struct StartPhaseEvent {
    pub timestamp: SystemTime,
    pub height: Height,
    pub phase: Phase,
    pub proposer: Address,
}

/// The validator locked on a value after seeing a quorum of prevotes for it.
pub struct UpdateLockedValueEvent {
    pub timestamp: SystemTime,
    pub height: Height,
    pub locked_phase: Phase,
    pub value_id: ValueId,
}

/// The validator saw a quorum of prevotes for a value, making it the value to re-propose.
pub struct UpdateValidValueEvent {
    pub timestamp: SystemTime,
    pub height: Height,
    pub valid_phase: Phase,
    pub value_id: ValueId,
}

/// A quorum of approving precommits for a valid proposal was observed.
pub struct DecideEvent {
    pub timestamp: SystemTime,
    pub height: Height,
    pub phase: Phase,
    pub proposer: Address,
    pub value_id: ValueId,
}

/// The finalizer reported the outcome of composing and broadcasting the final value of a height that
/// the local coordinator proposed.
pub struct FinalizeEvent {
    pub timestamp: SystemTime,
    pub height: Height,
    pub phase: Phase,
    pub succeeded: bool,
}

pub struct ProposeEvent {
    pub timestamp: SystemTime,
    pub proposal: Proposal,
}

pub struct PrevoteEvent {
    pub timestamp: SystemTime,
    pub prevote: Prevote,
}

pub struct PrecommitEvent {
    pub timestamp: SystemTime,
    pub precommit: Precommit,
}

pub struct ReceiveProposalEvent {
    pub timestamp: SystemTime,
    pub origin: Address,
    pub proposal: Proposal,
}

pub struct ReceivePrevoteEvent {
    pub timestamp: SystemTime,
    pub origin: Address,
    pub prevote: Prevote,
}

pub struct ReceivePrecommitEvent {
    pub timestamp: SystemTime,
    pub origin: Address,
    pub precommit: Precommit,
}

pub struct PhaseTimeoutEvent {
    pub timestamp: SystemTime,
    pub height: Height,
    pub phase: Phase,
    pub kind: TimeoutKind,
    pub timeout: Duration,
}

/// The validator skipped ahead to a later phase of the current height because enough coordinators were
/// already there.
pub struct FastForwardEvent {
    pub timestamp: SystemTime,
    pub height: Height,
    pub from_phase: Phase,
    pub to_phase: Phase,
}

pub struct ReapHeightsEvent {
    pub timestamp: SystemTime,
    pub heights: Vec<Height>,
}

/// The validator stopped making progress on `height` because of a local misconfiguration. Progress
/// resumes when a later height is committed.
pub struct HaltEvent {
    pub timestamp: SystemTime,
    pub height: Height,
    pub reason: Misconfiguration,
}
