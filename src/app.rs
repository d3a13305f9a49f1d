/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Traits for the collaborators that the consensus core calls into, and the request and response
//! types that flow through them.
//!
//! The consensus core only decides *which* value becomes the trust anchor of a height. Everything that
//! gives a value meaning is supplied by the user through three traits:
//! 1. [`Committees`]: resolves the coordinator committee of a height.
//! 2. [`App`]: composes candidate values when the local coordinator is the proposer, and validates
//!    values proposed by others.
//! 3. [`Ledger`]: turns a decided value and its quorum certificate into a final value, and broadcasts
//!    it to the rest of the system.
//!
//! ## Determinism
//!
//! Implementations of [`App::validate_value`] are expected to be *deterministic*: every correct
//! coordinator must reach the same verdict on the same value at the same height. A value that one
//! correct coordinator accepts and another rejects can stall a phase until its timeouts fire.
//!
//! ## Threads
//!
//! `Committees` and `App` are called from the algorithm thread, while `Ledger` is moved into and called
//! from a dedicated finalizer thread, so that slow final-value composition never blocks voting.

use crate::{
    networking::NetworkError,
    types::{
        certificates::QuorumCertificate,
        committee::Committee,
        crypto_primitives::Keypair,
        data_types::{Address, EpochRound, Height, Phase, Value},
    },
};

/// Source of the committee that is eligible to propose and vote at a given height.
pub trait Committees: Send {
    /// Resolve the committee of `height`.
    ///
    /// The consensus core calls this at most once per height *successfully*: the first `Resolved`
    /// response is cached for as long as the height is retained. `NotYetDeterminable` responses cause the
    /// call to be retried with exponential backoff.
    fn resolve_committee(&mut self, height: Height) -> CommitteeResolution;
}

pub enum CommitteeResolution {
    Resolved {
        epoch_round: EpochRound,
        committee: Committee,
    },
    NotYetDeterminable,
}

pub trait App: Send {
    /// Called when the local coordinator is the proposer of a phase and has no valid value to
    /// re-propose. `signer` may be used to sign any part of the value that must be attributable to the
    /// proposer.
    ///
    /// An `Err` makes the local coordinator a failed proposer for the phase: nothing is broadcast and
    /// the other coordinators prevote nil once their propose-timeouts fire.
    fn compose_candidate_value(
        &mut self,
        request: ComposeCandidateRequest,
        signer: &Keypair,
    ) -> Result<Value, AppError>;

    /// Called on every value proposed at the current height, including values the local coordinator
    /// composed itself.
    fn validate_value(&mut self, request: ValidateValueRequest) -> ValidateValueResponse;
}

pub struct ComposeCandidateRequest {
    height: Height,
    phase: Phase,
    epoch_round: EpochRound,
}

impl ComposeCandidateRequest {
    pub(crate) fn new(height: Height, phase: Phase, epoch_round: EpochRound) -> Self {
        Self {
            height,
            phase,
            epoch_round,
        }
    }

    pub fn height(&self) -> Height {
        self.height
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Get the epoch round that the committee of this height was resolved for.
    pub fn epoch_round(&self) -> EpochRound {
        self.epoch_round
    }
}

pub struct ValidateValueRequest<'a> {
    height: Height,
    phase: Phase,
    proposer: Address,
    value: &'a Value,
}

impl<'a> ValidateValueRequest<'a> {
    pub(crate) fn new(height: Height, phase: Phase, proposer: Address, value: &'a Value) -> Self {
        Self {
            height,
            phase,
            proposer,
            value,
        }
    }

    pub fn height(&self) -> Height {
        self.height
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn proposer(&self) -> Address {
        self.proposer
    }

    pub fn value(&self) -> &Value {
        self.value
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValidateValueResponse {
    Valid,
    Invalid,
    /// The value cannot be judged yet, typically because the part of the DAG it refers to has not
    /// arrived locally. Validation is retried after
    /// [`validation_retry_interval`](crate::replica::Configuration::validation_retry_interval).
    NeedsWaiting,
}

#[derive(Debug)]
pub enum AppError {
    /// The main chain has not advanced far enough for a candidate to be composed.
    NotReady,
    Other(String),
}

/// Sink for decided values.
pub trait Ledger: Send {
    /// Compose the final value of a height from the decided value and its quorum certificate.
    fn compose_final_value(
        &mut self,
        request: FinalValueRequest,
        signer: &Keypair,
    ) -> Result<FinalValue, ComposeError>;

    /// Broadcast a final value composed by [`compose_final_value`](Ledger::compose_final_value).
    ///
    /// Once the final value is durably part of the ledger, the user is expected to call
    /// [`Replica::height_committed`](crate::replica::Replica::height_committed) on every replica.
    fn broadcast_final_value(&mut self, final_value: FinalValue) -> Result<(), NetworkError>;
}

pub struct FinalValueRequest {
    height: Height,
    phase: Phase,
    value: Value,
    certificate: QuorumCertificate,
}

impl FinalValueRequest {
    pub(crate) fn new(
        height: Height,
        phase: Phase,
        value: Value,
        certificate: QuorumCertificate,
    ) -> Self {
        Self {
            height,
            phase,
            value,
            certificate,
        }
    }

    pub fn height(&self) -> Height {
        self.height
    }

    /// Get the phase in which the value was decided.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn certificate(&self) -> &QuorumCertificate {
        &self.certificate
    }
}

/// Final value of a height, as composed by the [`Ledger`]. Opaque to the consensus core.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FinalValue {
    pub height: Height,
    pub bytes: Vec<u8>,
}

#[derive(Debug)]
pub enum ComposeError {
    InvalidCertificate,
    Other(String),
}
