/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The algorithm thread, which drives the [consensus state machine](crate::consensus).
//!
//! The algorithm thread is the only thread that touches consensus state. It is a loop which, on every
//! iteration:
//! 1. Drains the heights that the ledger reported as committed through
//!    [`Replica::height_committed`](crate::replica::Replica::height_committed).
//! 2. Drains the outcomes reported by the [finalizer](crate::finalizer).
//! 3. Polls the network for one gossip message.
//! 4. Ticks the state machine, firing the pending timeout and retries if they are due.
//!
//! When an iteration finds nothing to do, the thread yields. Errors returned by the state machine are
//! logged and do not stop the loop.

use std::{
    sync::mpsc::{Receiver, TryRecvError},
    thread::{self, JoinHandle},
    time::Instant,
};

use crate::{
    app::{App, Committees},
    consensus::{implementation::Consensus, ConsensusError},
    finalizer::FinalizeOutcome,
    networking::Network,
    types::data_types::{Height, Phase},
};

pub(crate) struct Algorithm<N: Network, A: App, C: Committees> {
    consensus: Consensus<N, A, C>,
    network: N,
    initial_height: Height,
    committed_heights: Receiver<Height>,
    finalize_outcomes: Receiver<FinalizeOutcome>,
    shutdown_signal: Receiver<()>,
}

impl<N: Network + 'static, A: App + 'static, C: Committees + 'static> Algorithm<N, A, C> {
    pub(crate) fn new(
        consensus: Consensus<N, A, C>,
        network: N,
        initial_height: Height,
        committed_heights: Receiver<Height>,
        finalize_outcomes: Receiver<FinalizeOutcome>,
        shutdown_signal: Receiver<()>,
    ) -> Self {
        Self {
            consensus,
            network,
            initial_height,
            committed_heights,
            finalize_outcomes,
            shutdown_signal,
        }
    }

    pub(crate) fn start(mut self) -> JoinHandle<()> {
        thread::spawn(move || {
            let result = self
                .consensus
                .start_phase(self.initial_height, Phase::init());
            log_error(result);

            loop {
                match self.shutdown_signal.try_recv() {
                    Ok(()) | Err(TryRecvError::Disconnected) => return,
                    Err(TryRecvError::Empty) => (),
                }

                let mut idle = true;

                // 1. Heights committed by the ledger.
                while let Ok(height) = self.committed_heights.try_recv() {
                    idle = false;
                    let result = self.consensus.on_height_committed(height);
                    log_error(result);
                }

                // 2. Finalization outcomes.
                while let Ok(outcome) = self.finalize_outcomes.try_recv() {
                    idle = false;
                    let result = self.consensus.on_finalize_outcome(outcome);
                    log_error(result);
                }

                // 3. Gossip.
                if let Some((topic, message)) = self.network.recv() {
                    idle = false;
                    let result = self.consensus.on_receive_gossip(topic, message);
                    log_error(result);
                }

                // 4. Timeouts and retries.
                let result = self.consensus.tick(Instant::now());
                log_error(result);

                if idle {
                    thread::yield_now();
                }
            }
        })
    }
}

fn log_error(result: Result<(), ConsensusError>) {
    if let Err(err) = result {
        log::debug!("Algorithm thread continues after error: {:?}", err);
    }
}
