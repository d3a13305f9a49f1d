/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The coordinator committee of a height, and the quorum arithmetic derived from its size.
//!
//! ## Proposer rotation
//!
//! The proposer of phase `p` at height `h` is `committee[|h - p + K| mod N]`, where `N` is the
//! committee size and `K` is the configured proposer offset. Subtracting the phase means that the
//! proposer role moves "backwards" through the committee as phases fail, while consecutive heights
//! move it forwards. `K` decouples the rotation from the parity of the height.
//!
//! ## Quorums
//!
//! A committee of `N` members tolerates `f = ⌊(N - 1) / 3⌋` Byzantine members. A quorum is `2f + 1`
//! members, and `f + 1` members are enough to guarantee that at least one of them is correct.

use std::slice;

use super::data_types::{Address, Height, Phase};

/// Ordered list of coordinator addresses eligible to propose and vote at a height.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Committee(Vec<Address>);

impl Committee {
    /// Create a new `Committee` from `members`, keeping the order they were provided in.
    pub fn new(members: Vec<Address>) -> Self {
        Self(members)
    }

    /// Get the number of members of this committee.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check whether `address` is a member of this committee.
    pub fn contains(&self, address: &Address) -> bool {
        self.0.contains(address)
    }

    /// Iterate through the members of this committee in order.
    pub fn members(&self) -> slice::Iter<'_, Address> {
        self.0.iter()
    }

    /// Get the proposer of `phase` at `height`, given the proposer offset `k`.
    ///
    /// Returns `None` only if the committee is empty.
    pub fn proposer_at(&self, height: Height, phase: Phase, k: u64) -> Option<Address> {
        if self.0.is_empty() {
            return None;
        }

        let index = (height.int() as i128 - phase.int() as i128 + k as i128).unsigned_abs()
            % self.0.len() as u128;
        Some(self.0[index as usize])
    }
}

/// Maximum number of Byzantine members that a committee of `committee_size` members tolerates.
pub const fn fault_tolerance(committee_size: usize) -> usize {
    committee_size.saturating_sub(1) / 3
}

/// Number of members whose votes form a quorum in a committee of `committee_size` members.
pub const fn quorum(committee_size: usize) -> usize {
    2 * fault_tolerance(committee_size) + 1
}

/// Number of distinct members that must have moved on to a later phase before a validator follows
/// them without waiting out its own timeouts.
pub const fn fast_forward_threshold(committee_size: usize) -> usize {
    fault_tolerance(committee_size) + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn committee_of(n: u8) -> Committee {
        Committee::new((0..n).map(|i| Address::new([i; 32])).collect())
    }

    #[test]
    fn quorum_arithmetic_for_ten_coordinators() {
        assert_eq!(fault_tolerance(10), 3);
        assert_eq!(quorum(10), 7);
        assert_eq!(fast_forward_threshold(10), 4);
    }

    #[test]
    fn quorum_arithmetic_for_small_committees() {
        assert_eq!(quorum(1), 1);
        assert_eq!(quorum(4), 3);
        assert_eq!(quorum(7), 5);
    }

    #[test]
    fn proposer_rotates_with_height_and_phase() {
        let committee = committee_of(10);

        assert_eq!(
            committee.proposer_at(Height::new(100), Phase::new(0), 0),
            Some(Address::new([0; 32]))
        );
        assert_eq!(
            committee.proposer_at(Height::new(101), Phase::new(0), 0),
            Some(Address::new([1; 32]))
        );
        assert_eq!(
            committee.proposer_at(Height::new(101), Phase::new(1), 0),
            Some(Address::new([0; 32]))
        );
        assert_eq!(
            committee.proposer_at(Height::new(100), Phase::new(0), 3),
            Some(Address::new([3; 32]))
        );
    }

    #[test]
    fn proposer_index_uses_absolute_difference() {
        let committee = committee_of(10);

        // |2 - 5 + 0| = 3.
        assert_eq!(
            committee.proposer_at(Height::new(2), Phase::new(5), 0),
            Some(Address::new([3; 32]))
        );
    }

    #[test]
    fn empty_committee_has_no_proposer() {
        assert_eq!(
            Committee::new(Vec::new()).proposer_at(Height::new(1), Phase::new(0), 0),
            None
        );
    }
}
