/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Methods to build and run a replica of the consensus core.
//!
//! The key components of this module are:
//! - The builder-pattern interface to construct a [specification of the replica](ReplicaSpec) with:
//!   1. `ReplicaSpec::builder` to construct a `ReplicaSpecBuilder`,
//!   2. The setters of the `ReplicaSpecBuilder`, and
//!   3. The `ReplicaSpecBuilder::build` method to construct a [`ReplicaSpec`],
//! - The function to [start](ReplicaSpec::start) a [`Replica`] given its specification,
//! - [The type](Replica) which keeps the replica alive and relays ledger notifications to it.
//!
//! ## Starting a replica
//!
//! ```ignore
//! let replica =
//!     ReplicaSpec::builder()
//!     .app(app)
//!     .committees(committees)
//!     .ledger(ledger)
//!     .network(network)
//!     .configuration(configuration)
//!     .on_decide(decide_handler)
//!     .build()
//!     .start();
//!
//! // Whenever the ledger commits a height:
//! replica.height_committed(height);
//! ```
//!
//! ### Required setters
//!
//! The required setters are for providing the trait implementations required to run a replica:
//! - `.app(...)`
//! - `.committees(...)`
//! - `.ledger(...)`
//! - `.network(...)`
//! - `.configuration(...)`
//!
//! ### Optional setters
//!
//! The optional setters are for registering user-defined event handlers for events from
//! [`crate::events`]:
//! - `.on_start_phase(...)`
//! - `.on_update_locked_value(...)`
//! - `.on_update_valid_value(...)`
//! - `.on_decide(...)`
//! - `.on_finalize(...)`
//! - `.on_propose(...)`
//! - `.on_prevote(...)`
//! - `.on_precommit(...)`
//! - `.on_receive_proposal(...)`
//! - `.on_receive_prevote(...)`
//! - `.on_receive_precommit(...)`
//! - `.on_phase_timeout(...)`
//! - `.on_fast_forward(...)`
//! - `.on_reap_heights(...)`
//! - `.on_halt(...)`
//!
//! The replica's [configuration](Configuration) is also built using the builder pattern. Only the
//! keypair is required:
//!
//! ```ignore
//! let configuration =
//!     Configuration::builder()
//!     .me(signing_key)
//!     .initial_height(Height::new(100))
//!     .log_events(true)
//!     .build();
//! ```

use std::{
    sync::mpsc::{self, Sender},
    thread::JoinHandle,
    time::Duration,
};

use typed_builder::TypedBuilder;

use crate::{
    algorithm::Algorithm,
    app::{App, Committees, Ledger},
    consensus::{implementation::Consensus, ConsensusConfiguration},
    event_bus::*,
    events::*,
    finalizer::Finalizer,
    networking::Network,
    types::{
        crypto_primitives::{Keypair, SigningKey},
        data_types::Height,
    },
};

/// Stores the user-defined parameters required to start the replica.
///
/// ## Timeouts
///
/// Every timeout of phase `p` lasts `gst + delta × p`, so that phases eventually outlast the message
/// delay once the network stabilizes.
///
/// ## Log Events
///
/// The consensus core logs using the [log](https://docs.rs/log/latest/log/) crate. To get these
/// messages printed onto a terminal or to a file, set up a [logging
/// implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
#[derive(TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [Configuration]. On the builder call the following methods to construct a valid [Configuration].

    Required:
    - `.me(...)`

    Optional:
    - `.committee_size(...)`
    - `.proposer_offset(...)`
    - `.gst(...)`
    - `.delta(...)`
    - `.retained_heights(...)`
    - `.reap_interval(...)`
    - `.future_height_window(...)`
    - `.max_future_phases(...)`
    - `.deferred_capacity(...)`
    - `.committee_retry_base(...)`
    - `.committee_retry_max(...)`
    - `.validation_retry_interval(...)`
    - `.initial_height(...)`
    - `.log_events(...)`
"))]
pub struct Configuration {
    #[builder(setter(doc = "Set the coordinator's keypair, used to sign proposals and precommits. Required."))]
    pub me: SigningKey,
    #[builder(default = 10, setter(doc = "Set the number of coordinators in every committee. Defaults to 10."))]
    pub committee_size: usize,
    #[builder(default = 0, setter(doc = "Set the constant added to `height - phase` when selecting the proposer of a phase. Defaults to 0."))]
    pub proposer_offset: u64,
    #[builder(default = Duration::from_millis(3000), setter(doc = "Set the base duration of every timeout. Defaults to 3 s."))]
    pub gst: Duration,
    #[builder(default = Duration::from_millis(500), setter(doc = "Set the amount that timeouts grow by with every phase. Defaults to 500 ms."))]
    pub delta: Duration,
    #[builder(default = 100, setter(doc = "Set the number of heights behind the current height that are kept in memory. Defaults to 100."))]
    pub retained_heights: u64,
    #[builder(default = Duration::from_secs(10), setter(doc = "Set how often heights behind the retention horizon are purged. Defaults to 10 s."))]
    pub reap_interval: Duration,
    #[builder(default = 1, setter(doc = "Set how many heights ahead of the current height messages are kept for. Defaults to 1."))]
    pub future_height_window: u64,
    #[builder(default = 64, setter(doc = "Set how many phases ahead of the current phase messages are kept for. Defaults to 64."))]
    pub max_future_phases: u64,
    #[builder(default = 4096, setter(doc = "Set the maximum number of messages parked per height while they cannot be processed yet. Defaults to 4096."))]
    pub deferred_capacity: usize,
    #[builder(default = Duration::from_millis(100), setter(doc = "Set the delay before the first retry of an unresolvable committee. Defaults to 100 ms."))]
    pub committee_retry_base: Duration,
    #[builder(default = Duration::from_secs(5), setter(doc = "Set the maximum delay between retries of an unresolvable committee. Defaults to 5 s."))]
    pub committee_retry_max: Duration,
    #[builder(default = Duration::from_millis(200), setter(doc = "Set the delay before a proposal that the app could not judge yet is validated again. Defaults to 200 ms."))]
    pub validation_retry_interval: Duration,
    #[builder(default = Height::new(0), setter(doc = "Set the height that the replica starts at. Defaults to 0."))]
    pub initial_height: Height,
    #[builder(default = false, setter(doc = "Enable logging of every event? Defaults to false."))]
    pub log_events: bool,
}

impl From<Configuration> for (ConsensusConfiguration, Height, bool) {
    fn from(configuration: Configuration) -> Self {
        let consensus_config = ConsensusConfiguration {
            keypair: Keypair::new(configuration.me),
            committee_size: configuration.committee_size,
            proposer_offset: configuration.proposer_offset,
            gst: configuration.gst,
            delta: configuration.delta,
            retained_heights: configuration.retained_heights,
            reap_interval: configuration.reap_interval,
            future_height_window: configuration.future_height_window,
            max_future_phases: configuration.max_future_phases,
            deferred_capacity: configuration.deferred_capacity,
            committee_retry_base: configuration.committee_retry_base,
            committee_retry_max: configuration.committee_retry_max,
            validation_retry_interval: configuration.validation_retry_interval,
        };
        (
            consensus_config,
            configuration.initial_height,
            configuration.log_events,
        )
    }
}

/// Stores all necessary parameters and trait implementations required to run the [`Replica`].
#[derive(TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [ReplicaSpec]. On the builder call the following methods to construct a valid [ReplicaSpec].

    Required:
    - `.app(...)`
    - `.committees(...)`
    - `.ledger(...)`
    - `.network(...)`
    - `.configuration(...)`

    Optional:
    - `.on_start_phase(...)`
    - `.on_update_locked_value(...)`
    - `.on_update_valid_value(...)`
    - `.on_decide(...)`
    - `.on_finalize(...)`
    - `.on_propose(...)`
    - `.on_prevote(...)`
    - `.on_precommit(...)`
    - `.on_receive_proposal(...)`
    - `.on_receive_prevote(...)`
    - `.on_receive_precommit(...)`
    - `.on_phase_timeout(...)`
    - `.on_fast_forward(...)`
    - `.on_reap_heights(...)`
    - `.on_halt(...)`
"))]
pub struct ReplicaSpec<
    N: Network + 'static,
    A: App + 'static,
    C: Committees + 'static,
    L: Ledger + 'static,
> {
    // Required parameters
    #[builder(setter(doc = "Set the application that composes and validates candidate values. The argument must implement the [App](crate::app::App) trait. Required."))]
    app: A,
    #[builder(setter(doc = "Set the source of the committee of every height. The argument must implement the [Committees](crate::app::Committees) trait. Required."))]
    committees: C,
    #[builder(setter(doc = "Set the sink for decided values. The argument must implement the [Ledger](crate::app::Ledger) trait. Required."))]
    ledger: L,
    #[builder(setter(doc = "Set the implementation of gossip networking. The argument must implement the [Network](crate::networking::Network) trait. Required."))]
    network: N,
    #[builder(setter(doc = "Set the [configuration](Configuration), which contains the necessary parameters to run a replica. Required."))]
    configuration: Configuration,
    // Optional parameters
    #[builder(default, setter(transform = |handler: impl Fn(&StartPhaseEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<StartPhaseEvent>),
    doc = "Register a handler closure to be invoked after the replica starts a phase. Optional."))]
    on_start_phase: Option<HandlerPtr<StartPhaseEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&UpdateLockedValueEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<UpdateLockedValueEvent>),
    doc = "Register a handler closure to be invoked after the replica locks on a value. Optional."))]
    on_update_locked_value: Option<HandlerPtr<UpdateLockedValueEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&UpdateValidValueEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<UpdateValidValueEvent>),
    doc = "Register a handler closure to be invoked after the replica updates its valid value. Optional."))]
    on_update_valid_value: Option<HandlerPtr<UpdateValidValueEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&DecideEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<DecideEvent>),
    doc = "Register a handler closure to be invoked after the replica observes a decision. Optional."))]
    on_decide: Option<HandlerPtr<DecideEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&FinalizeEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<FinalizeEvent>),
    doc = "Register a handler closure to be invoked after the finalization of the replica's own decided proposal completes. Optional."))]
    on_finalize: Option<HandlerPtr<FinalizeEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ProposeEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ProposeEvent>),
    doc = "Register a handler closure to be invoked after the replica broadcasts a proposal. Optional."))]
    on_propose: Option<HandlerPtr<ProposeEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&PrevoteEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<PrevoteEvent>),
    doc = "Register a handler closure to be invoked after the replica broadcasts a prevote. Optional."))]
    on_prevote: Option<HandlerPtr<PrevoteEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&PrecommitEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<PrecommitEvent>),
    doc = "Register a handler closure to be invoked after the replica broadcasts a precommit. Optional."))]
    on_precommit: Option<HandlerPtr<PrecommitEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceiveProposalEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReceiveProposalEvent>),
    doc = "Register a handler closure to be invoked after the replica accepts a proposal. Optional."))]
    on_receive_proposal: Option<HandlerPtr<ReceiveProposalEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceivePrevoteEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReceivePrevoteEvent>),
    doc = "Register a handler closure to be invoked after the replica tallies a prevote. Optional."))]
    on_receive_prevote: Option<HandlerPtr<ReceivePrevoteEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceivePrecommitEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReceivePrecommitEvent>),
    doc = "Register a handler closure to be invoked after the replica tallies a precommit. Optional."))]
    on_receive_precommit: Option<HandlerPtr<ReceivePrecommitEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&PhaseTimeoutEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<PhaseTimeoutEvent>),
    doc = "Register a handler closure to be invoked after a timeout of the replica expires. Optional."))]
    on_phase_timeout: Option<HandlerPtr<PhaseTimeoutEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&FastForwardEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<FastForwardEvent>),
    doc = "Register a handler closure to be invoked after the replica skips ahead to a later phase. Optional."))]
    on_fast_forward: Option<HandlerPtr<FastForwardEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReapHeightsEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReapHeightsEvent>),
    doc = "Register a handler closure to be invoked after the replica purges old heights. Optional."))]
    on_reap_heights: Option<HandlerPtr<ReapHeightsEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&HaltEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<HaltEvent>),
    doc = "Register a handler closure to be invoked after the replica halts on a misconfigured height. Optional."))]
    on_halt: Option<HandlerPtr<HaltEvent>>,
}

impl<N: Network + 'static, A: App + 'static, C: Committees + 'static, L: Ledger + 'static>
    ReplicaSpec<N, A, C, L>
{
    /// Starts all threads and channels associated with running a replica, and returns the handles to
    /// them in a [`Replica`] struct.
    pub fn start(self) -> Replica {
        let (consensus_config, initial_height, log_events): (ConsensusConfiguration, Height, bool) =
            self.configuration.into();

        let mut event_handlers = EventHandlers::default();
        if log_events {
            event_handlers.add_loggers();
        }
        event_handlers.start_phase_handlers.extend(self.on_start_phase);
        event_handlers
            .update_locked_value_handlers
            .extend(self.on_update_locked_value);
        event_handlers
            .update_valid_value_handlers
            .extend(self.on_update_valid_value);
        event_handlers.decide_handlers.extend(self.on_decide);
        event_handlers.finalize_handlers.extend(self.on_finalize);
        event_handlers.propose_handlers.extend(self.on_propose);
        event_handlers.prevote_handlers.extend(self.on_prevote);
        event_handlers.precommit_handlers.extend(self.on_precommit);
        event_handlers
            .receive_proposal_handlers
            .extend(self.on_receive_proposal);
        event_handlers
            .receive_prevote_handlers
            .extend(self.on_receive_prevote);
        event_handlers
            .receive_precommit_handlers
            .extend(self.on_receive_precommit);
        event_handlers
            .phase_timeout_handlers
            .extend(self.on_phase_timeout);
        event_handlers.fast_forward_handlers.extend(self.on_fast_forward);
        event_handlers.reap_heights_handlers.extend(self.on_reap_heights);
        event_handlers.halt_handlers.extend(self.on_halt);

        let (event_publisher, event_subscriber) = if !event_handlers.is_empty() {
            Some(mpsc::channel()).unzip()
        } else {
            (None, None)
        };

        let (finalize_requests, finalize_request_receiver) = mpsc::channel();
        let (finalize_outcome_sender, finalize_outcomes) = mpsc::channel();
        let (finalizer_shutdown, finalizer_shutdown_receiver) = mpsc::channel();
        let finalizer = Finalizer::new(
            self.ledger,
            consensus_config.keypair.clone(),
            finalize_request_receiver,
            finalize_outcome_sender,
            finalizer_shutdown_receiver,
        )
        .start();

        let (committed_heights, committed_height_receiver) = mpsc::channel();
        let (algorithm_shutdown, algorithm_shutdown_receiver) = mpsc::channel();
        let consensus = Consensus::new(
            consensus_config,
            self.network.clone(),
            self.app,
            self.committees,
            finalize_requests,
            event_publisher,
        );
        let algorithm = Algorithm::new(
            consensus,
            self.network,
            initial_height,
            committed_height_receiver,
            finalize_outcomes,
            algorithm_shutdown_receiver,
        )
        .start();

        let (event_bus, event_bus_shutdown) = match event_subscriber {
            Some(event_subscriber) => {
                let (event_bus_shutdown, event_bus_shutdown_receiver) = mpsc::channel();
                let event_bus =
                    start_event_bus(event_handlers, event_subscriber, event_bus_shutdown_receiver);
                (Some(event_bus), Some(event_bus_shutdown))
            }
            None => (None, None),
        };

        Replica {
            committed_heights,
            algorithm: Some(algorithm),
            algorithm_shutdown,
            finalizer: Some(finalizer),
            finalizer_shutdown,
            event_bus,
            event_bus_shutdown,
        }
    }
}

/// A handle to the background threads of a replica. When this value is dropped, all background threads
/// are gracefully shut down.
pub struct Replica {
    committed_heights: Sender<Height>,
    algorithm: Option<JoinHandle<()>>,
    algorithm_shutdown: Sender<()>,
    finalizer: Option<JoinHandle<()>>,
    finalizer_shutdown: Sender<()>,
    event_bus: Option<JoinHandle<()>>,
    event_bus_shutdown: Option<Sender<()>>,
}

impl Replica {
    /// Notify the replica that the ledger committed `height`. The replica forgets the locks of the
    /// height and starts the next one.
    pub fn height_committed(&self, height: Height) {
        if self.committed_heights.send(height).is_err() {
            log::warn!(
                "Algorithm thread is not running, dropping commit of height {}",
                height
            );
        }
    }
}

impl Drop for Replica {
    fn drop(&mut self) {
        // The algorithm thread sends finalization requests and events, so it stops first.
        let _ = self.algorithm_shutdown.send(());
        if let Some(algorithm) = self.algorithm.take() {
            let _ = algorithm.join();
        }

        let _ = self.finalizer_shutdown.send(());
        if let Some(finalizer) = self.finalizer.take() {
            let _ = finalizer.join();
        }

        if let Some(event_bus_shutdown) = &self.event_bus_shutdown {
            let _ = event_bus_shutdown.send(());
        }
        if let Some(event_bus) = self.event_bus.take() {
            let _ = event_bus.join();
        }
    }
}
