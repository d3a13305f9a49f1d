/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that log out events.
//!
//! The logs defined in this module are printed if the user enabled them via the replica's
//! [config](crate::replica::Configuration).
//!
//! The consensus core logs using the [log](https://docs.rs/log/latest/log/) crate. To get these
//! messages printed onto a terminal or to a file, set up a
//! [logging implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
//!
//! ## Log message format
//!
//! Log messages are CSVs (Comma Separated Values) with at least two values. The first two values are
//! always:
//! 1. The name of the [event](crate::events) in PascalCase (defined in this module as constants).
//! 2. The time the event was emitted (as number of seconds since the Unix Epoch).
//!
//! The rest of the values differ depending on the kind of event. For example, the following snippet
//! is how a [ReceivePrevote](crate::events::ReceivePrevoteEvent) is printed:
//!
//! ```text
//! ReceivePrevote, 1701329264, Id5u7f6, 100, 0, fNGCJyk
//! ```
//!
//! In the snippet:
//! - The third value is the first seven characters of the Base64 encoding of the address of the
//!   origin of the prevote.
//! - The fourth and fifth values are the height and phase of the prevote.
//! - The sixth value is the first seven characters of the Base64 encoding of the ID of the value
//!   prevoted for, or `nil`.

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use std::time::SystemTime;

use crate::{
    events::*,
    types::data_types::{Phase, ValueId},
};

// Names of each event in PascalCase for printing:
pub const START_PHASE: &str = "StartPhase";
pub const UPDATE_LOCKED_VALUE: &str = "UpdateLockedValue";
pub const UPDATE_VALID_VALUE: &str = "UpdateValidValue";
pub const DECIDE: &str = "Decide";
pub const FINALIZE: &str = "Finalize";

pub const PROPOSE: &str = "Propose";
pub const PREVOTE: &str = "Prevote";
pub const PRECOMMIT: &str = "Precommit";

pub const RECEIVE_PROPOSAL: &str = "ReceiveProposal";
pub const RECEIVE_PREVOTE: &str = "ReceivePrevote";
pub const RECEIVE_PRECOMMIT: &str = "ReceivePrecommit";

pub const PHASE_TIMEOUT: &str = "PhaseTimeout";
pub const FAST_FORWARD: &str = "FastForward";
pub const REAP_HEIGHTS: &str = "ReapHeights";
pub const HALT: &str = "Halt";

/// Implemented by event types. Used to get a closure that logs the event.
pub(crate) trait Logger {
    /// Returns a pointer to the default logging handler for a given event type.
    fn get_logger() -> Box<dyn Fn(&Self) + Send>;
}

impl Logger for StartPhaseEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |start_phase_event: &StartPhaseEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                START_PHASE,
                secs_since_unix_epoch(start_phase_event.timestamp),
                start_phase_event.height,
                start_phase_event.phase,
                first_seven_base64_chars(&start_phase_event.proposer.bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for UpdateLockedValueEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |update_locked_value_event: &UpdateLockedValueEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                UPDATE_LOCKED_VALUE,
                secs_since_unix_epoch(update_locked_value_event.timestamp),
                update_locked_value_event.height,
                update_locked_value_event.locked_phase,
                first_seven_base64_chars(&update_locked_value_event.value_id.bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for UpdateValidValueEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |update_valid_value_event: &UpdateValidValueEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                UPDATE_VALID_VALUE,
                secs_since_unix_epoch(update_valid_value_event.timestamp),
                update_valid_value_event.height,
                update_valid_value_event.valid_phase,
                first_seven_base64_chars(&update_valid_value_event.value_id.bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for DecideEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |decide_event: &DecideEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                DECIDE,
                secs_since_unix_epoch(decide_event.timestamp),
                decide_event.height,
                decide_event.phase,
                first_seven_base64_chars(&decide_event.proposer.bytes()),
                first_seven_base64_chars(&decide_event.value_id.bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for FinalizeEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |finalize_event: &FinalizeEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                FINALIZE,
                secs_since_unix_epoch(finalize_event.timestamp),
                finalize_event.height,
                finalize_event.phase,
                finalize_event.succeeded
            )
        };
        Box::new(logger)
    }
}

impl Logger for ProposeEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |propose_event: &ProposeEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                PROPOSE,
                secs_since_unix_epoch(propose_event.timestamp),
                propose_event.proposal.height,
                propose_event.proposal.phase,
                first_seven_base64_chars(&propose_event.proposal.value.id().bytes()),
                source_phase_or_none(&propose_event.proposal.source_phase)
            )
        };
        Box::new(logger)
    }
}

impl Logger for PrevoteEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |prevote_event: &PrevoteEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                PREVOTE,
                secs_since_unix_epoch(prevote_event.timestamp),
                prevote_event.prevote.height,
                prevote_event.prevote.phase,
                value_id_or_nil(&prevote_event.prevote.value_id)
            )
        };
        Box::new(logger)
    }
}

impl Logger for PrecommitEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |precommit_event: &PrecommitEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                PRECOMMIT,
                secs_since_unix_epoch(precommit_event.timestamp),
                precommit_event.precommit.height,
                precommit_event.precommit.phase,
                value_id_or_nil(&precommit_event.precommit.value_id)
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceiveProposalEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |receive_proposal_event: &ReceiveProposalEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                RECEIVE_PROPOSAL,
                secs_since_unix_epoch(receive_proposal_event.timestamp),
                first_seven_base64_chars(&receive_proposal_event.origin.bytes()),
                receive_proposal_event.proposal.height,
                receive_proposal_event.proposal.phase,
                first_seven_base64_chars(&receive_proposal_event.proposal.value.id().bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceivePrevoteEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |receive_prevote_event: &ReceivePrevoteEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                RECEIVE_PREVOTE,
                secs_since_unix_epoch(receive_prevote_event.timestamp),
                first_seven_base64_chars(&receive_prevote_event.origin.bytes()),
                receive_prevote_event.prevote.height,
                receive_prevote_event.prevote.phase,
                value_id_or_nil(&receive_prevote_event.prevote.value_id)
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceivePrecommitEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |receive_precommit_event: &ReceivePrecommitEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                RECEIVE_PRECOMMIT,
                secs_since_unix_epoch(receive_precommit_event.timestamp),
                first_seven_base64_chars(&receive_precommit_event.origin.bytes()),
                receive_precommit_event.precommit.height,
                receive_precommit_event.precommit.phase,
                value_id_or_nil(&receive_precommit_event.precommit.value_id)
            )
        };
        Box::new(logger)
    }
}

impl Logger for PhaseTimeoutEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |phase_timeout_event: &PhaseTimeoutEvent| {
            log::info!(
                "{}, {}, {}, {}, {:?}, {}",
                PHASE_TIMEOUT,
                secs_since_unix_epoch(phase_timeout_event.timestamp),
                phase_timeout_event.height,
                phase_timeout_event.phase,
                phase_timeout_event.kind,
                phase_timeout_event.timeout.as_millis()
            )
        };
        Box::new(logger)
    }
}

impl Logger for FastForwardEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |fast_forward_event: &FastForwardEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                FAST_FORWARD,
                secs_since_unix_epoch(fast_forward_event.timestamp),
                fast_forward_event.height,
                fast_forward_event.from_phase,
                fast_forward_event.to_phase
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReapHeightsEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |reap_heights_event: &ReapHeightsEvent| {
            log::info!(
                "{}, {}, {}, {}",
                REAP_HEIGHTS,
                secs_since_unix_epoch(reap_heights_event.timestamp),
                reap_heights_event.heights.len(),
                reap_heights_event
                    .heights
                    .last()
                    .map_or(String::from("none"), |height| height.to_string())
            )
        };
        Box::new(logger)
    }
}

impl Logger for HaltEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |halt_event: &HaltEvent| {
            log::info!(
                "{}, {}, {}, {:?}",
                HALT,
                secs_since_unix_epoch(halt_event.timestamp),
                halt_event.height,
                halt_event.reason
            )
        };
        Box::new(logger)
    }
}

// Get a more readable representation of a bytesequence by base64-encoding it and taking the first 7 characters.
fn first_seven_base64_chars(bytes: &[u8]) -> String {
    let encoded = STANDARD_NO_PAD.encode(bytes);
    if encoded.len() > 7 {
        encoded[0..7].to_string()
    } else {
        encoded
    }
}

fn value_id_or_nil(value_id: &Option<ValueId>) -> String {
    match value_id {
        Some(value_id) => first_seven_base64_chars(&value_id.bytes()),
        None => String::from("nil"),
    }
}

fn source_phase_or_none(source_phase: &Option<Phase>) -> String {
    source_phase.map_or(String::from("none"), |phase| phase.to_string())
}

fn secs_since_unix_epoch(timestamp: SystemTime) -> u64 {
    timestamp
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_representations() {
        assert_eq!(first_seven_base64_chars(&[0u8; 32]), "AAAAAAA");
        assert_eq!(first_seven_base64_chars(&[0u8; 3]), "AAAA");
        assert_eq!(value_id_or_nil(&None), "nil");
        assert_eq!(
            secs_since_unix_epoch(SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(42)),
            42
        );
    }
}
