use std::{
    thread,
    time::{Duration, Instant},
};

use anchor_bft::types::{
    committee::Committee,
    crypto_primitives::SigningKey,
    data_types::{Address, Height, Value},
};
use log::LevelFilter;
use rand_core::OsRng;

mod common;

use crate::common::{
    ledger::{SharedLedger, StaticCommittees},
    logging::setup_logger,
    network::mock_network,
    node::Node,
};

const COMMITTEE_SIZE: usize = 10;

#[test]
fn committee_agrees_on_consecutive_heights_test() {
    setup_logger(LevelFilter::Debug);

    // 1. Initialize test components.

    // 1.1. Create signing keys for a full committee.
    let mut csprg = OsRng {};
    let keypairs: Vec<SigningKey> = (0..COMMITTEE_SIZE)
        .map(|_| SigningKey::generate(&mut csprg))
        .collect();
    let addresses: Vec<Address> = keypairs
        .iter()
        .map(|keypair| Address::from(keypair.verifying_key()))
        .collect();

    // 1.2. Every height is decided by the same committee, in the order of the keys.
    let committee = Committee::new(addresses.clone());
    let ledger = SharedLedger::new(committee.clone());

    // 1.3. Simultaneously start all replicas.
    let network_stubs = mock_network(addresses.into_iter());
    let nodes: Vec<Node> = keypairs
        .into_iter()
        .zip(network_stubs)
        .enumerate()
        .map(|(index, (keypair, network))| {
            Node::new(
                index,
                keypair,
                network,
                StaticCommittees::new(committee.clone()),
                ledger.clone(),
                Height::new(1),
            )
        })
        .collect();

    // 2. Relay every committed height back to the replicas until 3 heights are final.
    log::debug!("Waiting for heights 1 to 3 to become final.");
    drive_until_final(&nodes, &ledger, Height::new(3), Duration::from_secs(60));

    // 3. Check that every replica observed the decisions that became final.
    assert_agreement(&nodes, &ledger);
}

#[test]
fn committee_tolerates_crashed_proposers_test() {
    setup_logger(LevelFilter::Debug);

    // 1. Initialize test components.

    let mut csprg = OsRng {};
    let keypairs: Vec<SigningKey> = (0..COMMITTEE_SIZE)
        .map(|_| SigningKey::generate(&mut csprg))
        .collect();
    let addresses: Vec<Address> = keypairs
        .iter()
        .map(|keypair| Address::from(keypair.verifying_key()))
        .collect();
    let committee = Committee::new(addresses.clone());
    let ledger = SharedLedger::new(committee.clone());

    // 1.1. The coordinators at index 1 and 2 propose first at heights 1 and 2, and never start.
    let crashed = [1, 2];
    let network_stubs = mock_network(addresses.into_iter());
    let nodes: Vec<Node> = keypairs
        .into_iter()
        .zip(network_stubs)
        .enumerate()
        .filter(|(index, _)| !crashed.contains(index))
        .map(|(index, (keypair, network))| {
            Node::new(
                index,
                keypair,
                network,
                StaticCommittees::new(committee.clone()),
                ledger.clone(),
                Height::new(1),
            )
        })
        .collect();
    assert_eq!(nodes.len(), COMMITTEE_SIZE - crashed.len());

    // 2. The live coordinators time out the missing proposers and decide in a later phase.
    log::debug!("Waiting for heights 1 and 2 to become final without their first proposers.");
    drive_until_final(&nodes, &ledger, Height::new(2), Duration::from_secs(60));

    assert_agreement(&nodes, &ledger);
}

/// Poll the ledger and report every newly final height to every node, until `last` is final.
fn drive_until_final(nodes: &[Node], ledger: &SharedLedger, last: Height, limit: Duration) {
    let deadline = Instant::now() + limit;
    let mut reported: Option<Height> = None;

    loop {
        let final_values = ledger.final_values();
        for height in final_values.keys() {
            if reported.map_or(true, |reported| *height > reported) {
                log::debug!("Height {} is final, reporting it to every node.", height);
                for node in nodes {
                    node.height_committed(*height);
                }
                reported = Some(*height);
            }
        }

        if reported.map_or(false, |reported| reported >= last) {
            return;
        }

        assert!(
            Instant::now() < deadline,
            "height {} did not become final in time, last final height: {:?}",
            last,
            reported
        );
        thread::sleep(Duration::from_millis(50));
    }
}

fn assert_agreement(nodes: &[Node], ledger: &SharedLedger) {
    assert!(ledger.conflicts().is_empty());

    let final_values = ledger.final_values();
    for node in nodes {
        for (height, value_id) in node.decisions() {
            if let Some(final_value) = final_values.get(&height) {
                assert_eq!(
                    Value::new(final_value.bytes.clone()).id(),
                    value_id,
                    "node {:?} decided a value at height {} that did not become final",
                    node.address(),
                    height
                );
            }
        }
    }
}
