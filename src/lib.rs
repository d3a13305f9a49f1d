/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A Tendermint-style Byzantine fault tolerant consensus core that lets a fixed-size committee of
//! coordinators agree on exactly one trust anchor per height of a DAG ledger.
//!
//! Library users supply the [committee source](app::Committees), the [application](app::App) that
//! composes and validates candidate values, the [ledger](app::Ledger) that turns decided values into
//! final values, and the [gossip network](networking::Network). They then [build and
//! start](replica::ReplicaSpec) a [replica](replica::Replica) and report every height the ledger
//! commits back to it.
//!
//! The protocol itself is described in the documentation of the [consensus] module.

pub mod app;

pub(crate) mod algorithm;

pub(crate) mod consensus;
pub use consensus::{ConsensusError, Misconfiguration};

pub(crate) mod event_bus;

pub mod events;

pub mod finalizer;

pub(crate) mod logging;

pub mod messages;

pub mod networking;

pub mod replica;

pub(crate) mod store;

pub mod timeout;

pub mod types;
