/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The Tendermint-style consensus state machine that decides one trust anchor per height.
//!
//! ## Phases and steps
//!
//! Every height is decided in one or more *phases* (rounds). Each phase goes through three steps:
//! 1. **Propose**: the proposer of the phase broadcasts a value. If it saw a value gather a quorum of
//!    prevotes in an earlier phase (its *valid value*), it re-proposes that value along with the phase
//!    it became valid in, the *source phase*.
//! 2. **Prevote**: every coordinator prevotes the proposed value if it is valid and does not conflict
//!    with its *lock*, and prevotes nil otherwise.
//! 3. **Precommit**: a coordinator that sees a quorum of prevotes for a valid value locks on it and
//!    precommits it, signing its ID. A quorum of opposing prevotes leads to a nil precommit instead.
//!
//! A quorum of approving precommits for a valid value at any phase of the current height decides it.
//! If the decided value was proposed by the local coordinator, it is handed to the
//! [finalizer](crate::finalizer) together with the collected precommit signatures.
//!
//! ## Safety and liveness
//!
//! Locks only ever move to later phases, and a locked coordinator prevotes a conflicting value only if
//! that value gathered a quorum of prevotes *after* the lock was taken. Two quorums of `2f + 1` out of
//! `3f + 1` intersect in at least one correct coordinator, so no two values can be decided at the same
//! height.
//!
//! Liveness relies on partial synchrony: every step that waits for messages is bounded by a
//! [timeout](crate::timeout) that grows with the phase, and coordinators that fall behind
//! [fast-forward](decision) to a phase that `f + 1` coordinators have already reached.
//!
//! ## Module layout
//!
//! - [`implementation`]: the [`Consensus`](implementation::Consensus) struct, phase entry, proposing,
//!   timeouts, height advance, and finalization outcomes.
//! - [`router`]: validation and tallying of inbound gossip.
//! - [`decision`]: the rules that are re-evaluated after every state change.

use std::time::Duration;

use crate::types::{crypto_primitives::Keypair, data_types::Height};

pub(crate) mod implementation;

pub(crate) mod router;

pub(crate) mod decision;


/// Immutable parameters of the consensus state machine.
#[derive(Clone)]
pub(crate) struct ConsensusConfiguration {
    pub(crate) keypair: Keypair,
    pub(crate) committee_size: usize,
    pub(crate) proposer_offset: u64,
    pub(crate) gst: Duration,
    pub(crate) delta: Duration,
    pub(crate) retained_heights: u64,
    pub(crate) reap_interval: Duration,
    pub(crate) future_height_window: u64,
    pub(crate) max_future_phases: u64,
    pub(crate) deferred_capacity: usize,
    pub(crate) committee_retry_base: Duration,
    pub(crate) committee_retry_max: Duration,
    pub(crate) validation_retry_interval: Duration,
}

#[derive(Debug)]
pub enum ConsensusError {
    /// The local configuration is inconsistent with the committee of `height`. The validator halts on
    /// the height until a later height is committed.
    Misconfiguration {
        height: Height,
        reason: Misconfiguration,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Misconfiguration {
    CommitteeSizeMismatch { expected: usize, actual: usize },
    NotACommitteeMember,
}
