use std::{
    collections::HashMap,
    sync::{
        mpsc::{self, Receiver, Sender, TryRecvError},
        Arc, Mutex,
    },
};

use anchor_bft::{
    messages::{GossipMessage, TopicKey},
    networking::{Network, NetworkError},
    types::data_types::Address,
};

/// A mock gossip network which passes messages from and to threads using channels.
#[derive(Clone)]
pub(crate) struct NetworkStub {
    my_address: Address,
    all_peers: HashMap<Address, Sender<(TopicKey, GossipMessage)>>,
    inbox: Arc<Mutex<Receiver<(TopicKey, GossipMessage)>>>,
}

impl Network for NetworkStub {
    fn broadcast(&mut self, topic: TopicKey, message: GossipMessage) -> Result<(), NetworkError> {
        for (peer, sender) in &self.all_peers {
            if *peer != self.my_address {
                // Peers that are not running drop the message.
                let _ = sender.send((topic, message.clone()));
            }
        }
        Ok(())
    }

    fn recv(&mut self) -> Option<(TopicKey, GossipMessage)> {
        match self.inbox.lock().unwrap().try_recv() {
            Ok(topic_and_message) => Some(topic_and_message),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }
}

pub(crate) fn mock_network(peers: impl Iterator<Item = Address>) -> Vec<NetworkStub> {
    let mut all_peers = HashMap::new();
    let peer_and_inboxes: Vec<(Address, Receiver<(TopicKey, GossipMessage)>)> = peers
        .map(|peer| {
            let (sender, receiver) = mpsc::channel();
            all_peers.insert(peer, sender);

            (peer, receiver)
        })
        .collect();

    peer_and_inboxes
        .into_iter()
        .map(|(my_address, inbox)| NetworkStub {
            my_address,
            all_peers: all_peers.clone(),
            inbox: Arc::new(Mutex::new(inbox)),
        })
        .collect()
}
