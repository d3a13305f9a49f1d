/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The event bus thread, which receives [events](crate::events) from the algorithm thread and runs the
//! handlers registered for them.

use std::{
    sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError},
    thread::{self, JoinHandle},
    time::Duration,
};

use crate::{events::*, logging::Logger};

pub(crate) type HandlerPtr<T> = Box<dyn Fn(&T) + Send>;

#[derive(Default)]
pub(crate) struct EventHandlers {
    pub(crate) start_phase_handlers: Vec<HandlerPtr<StartPhaseEvent>>,
    pub(crate) update_locked_value_handlers: Vec<HandlerPtr<UpdateLockedValueEvent>>,
    pub(crate) update_valid_value_handlers: Vec<HandlerPtr<UpdateValidValueEvent>>,
    pub(crate) decide_handlers: Vec<HandlerPtr<DecideEvent>>,
    pub(crate) finalize_handlers: Vec<HandlerPtr<FinalizeEvent>>,
    pub(crate) propose_handlers: Vec<HandlerPtr<ProposeEvent>>,
    pub(crate) prevote_handlers: Vec<HandlerPtr<PrevoteEvent>>,
    pub(crate) precommit_handlers: Vec<HandlerPtr<PrecommitEvent>>,
    pub(crate) receive_proposal_handlers: Vec<HandlerPtr<ReceiveProposalEvent>>,
    pub(crate) receive_prevote_handlers: Vec<HandlerPtr<ReceivePrevoteEvent>>,
    pub(crate) receive_precommit_handlers: Vec<HandlerPtr<ReceivePrecommitEvent>>,
    pub(crate) phase_timeout_handlers: Vec<HandlerPtr<PhaseTimeoutEvent>>,
    pub(crate) fast_forward_handlers: Vec<HandlerPtr<FastForwardEvent>>,
    pub(crate) reap_heights_handlers: Vec<HandlerPtr<ReapHeightsEvent>>,
    pub(crate) halt_handlers: Vec<HandlerPtr<HaltEvent>>,
}

impl EventHandlers {
    /// Register the default [logger](crate::logging) of every event type.
    pub(crate) fn add_loggers(&mut self) {
        self.start_phase_handlers.push(StartPhaseEvent::get_logger());
        self.update_locked_value_handlers
            .push(UpdateLockedValueEvent::get_logger());
        self.update_valid_value_handlers
            .push(UpdateValidValueEvent::get_logger());
        self.decide_handlers.push(DecideEvent::get_logger());
        self.finalize_handlers.push(FinalizeEvent::get_logger());
        self.propose_handlers.push(ProposeEvent::get_logger());
        self.prevote_handlers.push(PrevoteEvent::get_logger());
        self.precommit_handlers.push(PrecommitEvent::get_logger());
        self.receive_proposal_handlers
            .push(ReceiveProposalEvent::get_logger());
        self.receive_prevote_handlers
            .push(ReceivePrevoteEvent::get_logger());
        self.receive_precommit_handlers
            .push(ReceivePrecommitEvent::get_logger());
        self.phase_timeout_handlers.push(PhaseTimeoutEvent::get_logger());
        self.fast_forward_handlers.push(FastForwardEvent::get_logger());
        self.reap_heights_handlers.push(ReapHeightsEvent::get_logger());
        self.halt_handlers.push(HaltEvent::get_logger());
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.start_phase_handlers.is_empty()
            && self.update_locked_value_handlers.is_empty()
            && self.update_valid_value_handlers.is_empty()
            && self.decide_handlers.is_empty()
            && self.finalize_handlers.is_empty()
            && self.propose_handlers.is_empty()
            && self.prevote_handlers.is_empty()
            && self.precommit_handlers.is_empty()
            && self.receive_proposal_handlers.is_empty()
            && self.receive_prevote_handlers.is_empty()
            && self.receive_precommit_handlers.is_empty()
            && self.phase_timeout_handlers.is_empty()
            && self.fast_forward_handlers.is_empty()
            && self.reap_heights_handlers.is_empty()
            && self.halt_handlers.is_empty()
    }

    pub(crate) fn fire_handlers(&self, event: Event) {
        match event {
            Event::StartPhase(start_phase_event) => self
                .start_phase_handlers
                .iter()
                .for_each(|handler| handler(&start_phase_event)),

            Event::UpdateLockedValue(update_locked_value_event) => self
                .update_locked_value_handlers
                .iter()
                .for_each(|handler| handler(&update_locked_value_event)),

            Event::UpdateValidValue(update_valid_value_event) => self
                .update_valid_value_handlers
                .iter()
                .for_each(|handler| handler(&update_valid_value_event)),

            Event::Decide(decide_event) => self
                .decide_handlers
                .iter()
                .for_each(|handler| handler(&decide_event)),

            Event::Finalize(finalize_event) => self
                .finalize_handlers
                .iter()
                .for_each(|handler| handler(&finalize_event)),

            Event::Propose(propose_event) => self
                .propose_handlers
                .iter()
                .for_each(|handler| handler(&propose_event)),

            Event::Prevote(prevote_event) => self
                .prevote_handlers
                .iter()
                .for_each(|handler| handler(&prevote_event)),

            Event::Precommit(precommit_event) => self
                .precommit_handlers
                .iter()
                .for_each(|handler| handler(&precommit_event)),

            Event::ReceiveProposal(receive_proposal_event) => self
                .receive_proposal_handlers
                .iter()
                .for_each(|handler| handler(&receive_proposal_event)),

            Event::ReceivePrevote(receive_prevote_event) => self
                .receive_prevote_handlers
                .iter()
                .for_each(|handler| handler(&receive_prevote_event)),

            Event::ReceivePrecommit(receive_precommit_event) => self
                .receive_precommit_handlers
                .iter()
                .for_each(|handler| handler(&receive_precommit_event)),

            Event::PhaseTimeout(phase_timeout_event) => self
                .phase_timeout_handlers
                .iter()
                .for_each(|handler| handler(&phase_timeout_event)),

            Event::FastForward(fast_forward_event) => self
                .fast_forward_handlers
                .iter()
                .for_each(|handler| handler(&fast_forward_event)),

            Event::ReapHeights(reap_heights_event) => self
                .reap_heights_handlers
                .iter()
                .for_each(|handler| handler(&reap_heights_event)),

            Event::Halt(halt_event) => self
                .halt_handlers
                .iter()
                .for_each(|handler| handler(&halt_event)),
        }
    }
}

pub(crate) fn start_event_bus(
    event_handlers: EventHandlers,
    event_subscriber: Receiver<Event>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => return,
            Err(TryRecvError::Empty) => (),
        }

        match event_subscriber.recv_timeout(Duration::from_millis(50)) {
            Ok(event) => event_handlers.fire_handlers(event),
            Err(RecvTimeoutError::Timeout) => (),
            Err(RecvTimeoutError::Disconnected) => {
                log::debug!("Event publisher disconnected, stopping the event bus.");
                return;
            }
        }
    })
}
