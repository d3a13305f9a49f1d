/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Single-slot timer for the propose, prevote, and precommit timeouts of the current phase.
//!
//! Under partial synchrony, messages between correct coordinators are delivered within `DELTA` after
//! the global stabilization time `GST`. Phase `p` therefore waits `GST + DELTA × p` before giving up on
//! a step, so that later phases wait longer and eventually outlast any message delay.
//!
//! Only one timeout is ever armed. Arming a new one replaces the pending one, and expired timeouts are
//! handed out exactly once by [`poll_expired`](TimeoutScheduler::poll_expired).

use std::time::{Duration, Instant};

use crate::types::data_types::{Height, Phase};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TimeoutKind {
    Propose,
    Prevote,
    Precommit,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct ArmedTimeout {
    pub(crate) kind: TimeoutKind,
    pub(crate) height: Height,
    pub(crate) phase: Phase,
    pub(crate) duration: Duration,
    pub(crate) deadline: Instant,
}

pub(crate) struct TimeoutScheduler {
    gst: Duration,
    delta: Duration,
    armed: Option<ArmedTimeout>,
}

impl TimeoutScheduler {
    pub(crate) fn new(gst: Duration, delta: Duration) -> Self {
        Self {
            gst,
            delta,
            armed: None,
        }
    }

    /// Get the duration of every timeout of `phase`: `GST + DELTA × phase`.
    pub(crate) fn duration(&self, phase: Phase) -> Duration {
        let multiplier = u32::try_from(phase.int()).unwrap_or(u32::MAX);
        self.gst.saturating_add(self.delta.saturating_mul(multiplier))
    }

    /// Arm a timeout of `kind` for `(height, phase)`, replacing any pending timeout.
    pub(crate) fn arm(
        &mut self,
        kind: TimeoutKind,
        height: Height,
        phase: Phase,
        now: Instant,
    ) -> ArmedTimeout {
        let duration = self.duration(phase);
        let armed = ArmedTimeout {
            kind,
            height,
            phase,
            duration,
            deadline: now + duration,
        };
        self.armed = Some(armed);
        armed
    }

    pub(crate) fn cancel(&mut self) {
        self.armed = None;
    }

    pub(crate) fn armed(&self) -> Option<&ArmedTimeout> {
        self.armed.as_ref()
    }

    /// Disarm and return the pending timeout if its deadline is not later than `now`.
    pub(crate) fn poll_expired(&mut self, now: Instant) -> Option<ArmedTimeout> {
        match self.armed {
            Some(armed) if armed.deadline <= now => self.armed.take(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduler() -> TimeoutScheduler {
        TimeoutScheduler::new(Duration::from_millis(3000), Duration::from_millis(500))
    }

    #[test]
    fn duration_grows_by_delta_every_phase() {
        let scheduler = scheduler();
        assert_eq!(scheduler.duration(Phase::new(0)), Duration::from_millis(3000));
        assert_eq!(scheduler.duration(Phase::new(1)), Duration::from_millis(3500));
        assert_eq!(scheduler.duration(Phase::new(4)), Duration::from_millis(5000));
    }

    #[test]
    fn arming_replaces_the_pending_timeout() {
        let mut scheduler = scheduler();
        let now = Instant::now();
        scheduler.arm(TimeoutKind::Propose, Height::new(1), Phase::new(0), now);
        scheduler.arm(TimeoutKind::Prevote, Height::new(1), Phase::new(0), now);

        assert_eq!(scheduler.armed().map(|armed| armed.kind), Some(TimeoutKind::Prevote));
    }

    #[test]
    fn expired_timeout_fires_exactly_once() {
        let mut scheduler = scheduler();
        let now = Instant::now();
        scheduler.arm(TimeoutKind::Precommit, Height::new(1), Phase::new(2), now);

        assert!(scheduler.poll_expired(now).is_none());

        let fired = scheduler.poll_expired(now + Duration::from_millis(4000));
        assert_eq!(
            fired.map(|armed| (armed.kind, armed.phase)),
            Some((TimeoutKind::Precommit, Phase::new(2)))
        );
        assert!(scheduler.poll_expired(now + Duration::from_millis(4000)).is_none());
    }
}
