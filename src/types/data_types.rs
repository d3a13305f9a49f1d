/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types that exist only to store bytes or numbers, and do not have any major "active" behavior.

use std::{
    fmt::{self, Debug, Display, Formatter},
    hash::Hash,
    ops::{Add, AddAssign},
};

use borsh::{BorshDeserialize, BorshSerialize};

use super::crypto_primitives::{CryptoHasher, Digest, SignatureError, VerifyingKey};

/// Index of a consensus instance. Every height of the DAG ledger gets exactly one decided value.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct Height(u64);

impl Height {
    /// Create a new `Height` wrapping `int`.
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    /// Get the inner `u64` value of this `Height`.
    pub const fn int(&self) -> u64 {
        self.0
    }

    /// Get the height that is `count` heights below this one, saturating at 0.
    pub fn saturating_sub(&self, count: u64) -> Height {
        Height(self.0.saturating_sub(count))
    }
}

impl Display for Height {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Add<u64> for Height {
    type Output = Height;

    fn add(self, rhs: u64) -> Self::Output {
        Height(self.0 + rhs)
    }
}

/// A sub-attempt (round) within a height. Starts at 0 on every height and increases by 1 every time
/// an attempt fails to converge.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct Phase(u64);

impl Phase {
    /// Create a new `Phase` wrapping `int`.
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    /// Get the first `Phase` of every height, which is 0.
    pub const fn init() -> Self {
        Self(0)
    }

    /// Get the inner `u64` value of this `Phase`.
    pub const fn int(&self) -> u64 {
        self.0
    }
}

impl Display for Phase {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Add<u64> for Phase {
    type Output = Phase;

    fn add(self, rhs: u64) -> Self::Output {
        Phase(self.0 + rhs)
    }
}

impl AddAssign<u64> for Phase {
    fn add_assign(&mut self, rhs: u64) {
        self.0.add_assign(rhs)
    }
}

/// Epoch round that a committee was resolved for. Opaque to the consensus core; it is only passed
/// back to the [`App`](crate::app::App) when composing a candidate value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct EpochRound(u64);

impl EpochRound {
    /// Create a new `EpochRound` wrapping `int`.
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    /// Get the inner `u64` value of this `EpochRound`.
    pub const fn int(&self) -> u64 {
        self.0
    }
}

/// 32-byte cryptographic hash. Within this crate, `CryptoHash`-es are always SHA256 hashes.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct CryptoHash([u8; 32]);

impl CryptoHash {
    /// Create a new `CryptoHash` wrapping `bytes`.
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the inner `[u8; 32]` value of this `CryptoHash`.
    pub const fn bytes(&self) -> [u8; 32] {
        self.0
    }
}

impl Debug for CryptoHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Content identifier of a [`Value`]: the SHA256 hash of its bytes.
///
/// Two values are considered "the same value" everywhere in the consensus rules if and only if their
/// `ValueId`s are equal.
pub type ValueId = CryptoHash;

/// Ed25519 digital signature.
#[derive(Clone, Copy, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct SignatureBytes([u8; 64]);

impl SignatureBytes {
    /// Create a new `SignatureBytes` wrapping `bytes`.
    pub const fn new(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    /// Get the inner `[u8; 64]` value of this `SignatureBytes`.
    pub const fn bytes(&self) -> [u8; 64] {
        self.0
    }
}

impl Debug for SignatureBytes {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Address of a coordinator: the bytes of its Ed25519 verifying key.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct Address([u8; 32]);

impl Address {
    /// Create a new `Address` wrapping `bytes`.
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the inner `[u8; 32]` value of this `Address`.
    pub const fn bytes(&self) -> [u8; 32] {
        self.0
    }

    /// Interpret this `Address` as an Ed25519 verifying key.
    pub fn verifying_key(&self) -> Result<VerifyingKey, SignatureError> {
        VerifyingKey::from_bytes(&self.0)
    }
}

impl From<VerifyingKey> for Address {
    fn from(verifying_key: VerifyingKey) -> Self {
        Address(verifying_key.to_bytes())
    }
}

impl Debug for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Opaque candidate value that the committee agrees on, as produced by
/// [`App::compose_candidate_value`](crate::app::App::compose_candidate_value).
#[derive(Clone, PartialEq, Eq, Hash, BorshDeserialize, BorshSerialize)]
pub struct Value(Vec<u8>);

impl Value {
    /// Create a new `Value` wrapping `bytes`.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Get a reference to the inner bytes of this `Value`.
    pub const fn bytes(&self) -> &Vec<u8> {
        &self.0
    }

    /// Compute the content identifier of this `Value`.
    pub fn id(&self) -> ValueId {
        let mut hasher = CryptoHasher::new();
        hasher.update(&self.0);
        CryptoHash::new(hasher.finalize().into())
    }
}

impl Debug for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Value({} bytes)", self.0.len())
    }
}

/// Step of the current phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Step {
    Propose,
    Prevote,
    Precommit,
}

/// Outcome of validating a proposed [`Value`], as recorded alongside the proposal.
///
/// A proposal recorded as `Invalid` still takes part in vote counting: every vote for it is counted
/// as opposing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Validity {
    Invalid,
    Valid,
}

impl Validity {
    pub fn is_valid(self) -> bool {
        self == Validity::Valid
    }
}
