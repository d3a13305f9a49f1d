/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Pluggable gossip transport.
//!
//! The consensus core does not open any connections of its own. It publishes [`GossipMessage`]s under
//! [`TopicKey`]s through a user-provided [`Network`], and polls the same `Network` for messages gossiped
//! by other coordinators. Deduplication of retransmissions and anti-entropy are the transport's
//! responsibility; the core tolerates duplicates either way.

use crate::messages::{GossipMessage, TopicKey};

pub trait Network: Clone + Send {
    /// Publish `message` under `topic` to every coordinator, without blocking.
    fn broadcast(&mut self, topic: TopicKey, message: GossipMessage) -> Result<(), NetworkError>;

    /// Receive a message gossiped by any coordinator. Returns immediately with a `None` if no message is
    /// available now.
    fn recv(&mut self) -> Option<(TopicKey, GossipMessage)>;
}

#[derive(Debug)]
pub enum NetworkError {
    /// The transport has shut down.
    Disconnected,
    Rejected(String),
}

/// Handle for broadcasting messages to the [`Network`].
///
/// Send failures are logged at warn level and never retried.
#[derive(Clone)]
pub(crate) struct SenderHandle<N: Network> {
    network: N,
}

impl<N: Network> SenderHandle<N> {
    pub(crate) fn new(network: N) -> Self {
        Self { network }
    }

    pub(crate) fn broadcast<M: Into<GossipMessage>>(&mut self, msg: M) {
        let msg = msg.into();
        let topic = msg.topic();
        if let Err(err) = self.network.broadcast(topic, msg) {
            log::warn!(
                "Failed to broadcast {:?} for height {}, phase {}: {:?}",
                topic.kind,
                topic.height,
                topic.phase,
                err
            );
        }
    }
}
