use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use anchor_bft::{
    events::{DecideEvent, FinalizeEvent, PhaseTimeoutEvent, ProposeEvent, StartPhaseEvent},
    replica::{Configuration, Replica, ReplicaSpec},
    types::{
        crypto_primitives::SigningKey,
        data_types::{Address, Height, ValueId},
    },
};

use crate::common::{
    ledger::{AnchorApp, SharedLedger, StaticCommittees},
    logging::{first_seven_base64_chars, log_with_context},
    network::NetworkStub,
};

/// Things the Nodes will have in common:
/// - Committee.
/// - Ledger.
/// - Configuration, except for the keypair.
///
/// Things that they will differ in:
/// - App instance.
/// - Network instance.
/// - Keypair.
pub(crate) struct Node {
    address: Address,
    decisions: Arc<Mutex<Vec<(Height, ValueId)>>>,
    replica: Replica,
}

impl Node {
    pub(crate) fn new(
        index: usize,
        keypair: SigningKey,
        network: NetworkStub,
        committees: StaticCommittees,
        ledger: SharedLedger,
        initial_height: Height,
    ) -> Node {
        let address = Address::from(keypair.verifying_key());
        let decisions = Arc::new(Mutex::new(Vec::new()));

        let configuration = Configuration::builder()
            .me(keypair)
            .gst(Duration::from_millis(500))
            .delta(Duration::from_millis(100))
            .committee_retry_base(Duration::from_millis(10))
            .validation_retry_interval(Duration::from_millis(10))
            .initial_height(initial_height)
            .log_events(false)
            .build();

        let replica = ReplicaSpec::builder()
            .app(AnchorApp::new(index as u8))
            .committees(committees)
            .ledger(ledger)
            .network(network)
            .configuration(configuration)
            .on_start_phase(start_phase_handler(address))
            .on_propose(propose_handler(address))
            .on_phase_timeout(phase_timeout_handler(address))
            .on_decide(decide_handler(address, decisions.clone()))
            .on_finalize(finalize_handler(address))
            .build()
            .start();

        Node {
            address,
            decisions,
            replica,
        }
    }

    pub(crate) fn address(&self) -> Address {
        self.address
    }

    pub(crate) fn height_committed(&self, height: Height) {
        self.replica.height_committed(height)
    }

    /// Get every decision this node observed, in the order it observed them.
    pub(crate) fn decisions(&self) -> Vec<(Height, ValueId)> {
        self.decisions.lock().unwrap().clone()
    }
}

fn start_phase_handler(address: Address) -> impl Fn(&StartPhaseEvent) + Send + 'static {
    move |start_phase_event: &StartPhaseEvent| {
        log_with_context(
            Some(address),
            &format!(
                "Started phase, height: {}, phase: {}, proposer: {}",
                start_phase_event.height,
                start_phase_event.phase,
                first_seven_base64_chars(&start_phase_event.proposer.bytes())
            ),
        );
    }
}

fn propose_handler(address: Address) -> impl Fn(&ProposeEvent) + Send + 'static {
    move |propose_event: &ProposeEvent| {
        log_with_context(
            Some(address),
            &format!(
                "Proposed, height: {}, phase: {}, value id: {}",
                propose_event.proposal.height,
                propose_event.proposal.phase,
                first_seven_base64_chars(&propose_event.proposal.value.id().bytes())
            ),
        );
    }
}

fn phase_timeout_handler(address: Address) -> impl Fn(&PhaseTimeoutEvent) + Send + 'static {
    move |phase_timeout_event: &PhaseTimeoutEvent| {
        log_with_context(
            Some(address),
            &format!(
                "{:?} timeout, height: {}, phase: {}",
                phase_timeout_event.kind, phase_timeout_event.height, phase_timeout_event.phase
            ),
        );
    }
}

fn decide_handler(
    address: Address,
    decisions: Arc<Mutex<Vec<(Height, ValueId)>>>,
) -> impl Fn(&DecideEvent) + Send + 'static {
    move |decide_event: &DecideEvent| {
        log_with_context(
            Some(address),
            &format!(
                "Decided, height: {}, phase: {}, value id: {}",
                decide_event.height,
                decide_event.phase,
                first_seven_base64_chars(&decide_event.value_id.bytes())
            ),
        );
        decisions
            .lock()
            .unwrap()
            .push((decide_event.height, decide_event.value_id));
    }
}

fn finalize_handler(address: Address) -> impl Fn(&FinalizeEvent) + Send + 'static {
    move |finalize_event: &FinalizeEvent| {
        log_with_context(
            Some(address),
            &format!(
                "Finalized, height: {}, phase: {}, succeeded: {}",
                finalize_event.height, finalize_event.phase, finalize_event.succeeded
            ),
        );
    }
}
