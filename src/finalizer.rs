/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The finalizer thread, which turns values decided on the local coordinator's own proposals into final
//! values.
//!
//! Composing a final value may take arbitrarily long, so it runs outside the algorithm thread. The
//! algorithm thread sends a [`FinalizeRequest`] and keeps voting; the finalizer calls the
//! [`Ledger`] and reports back a [`FinalizeOutcome`] carrying the `(height, phase)` it was requested
//! for. By the time the outcome arrives the algorithm thread may have moved on, so it checks the outcome
//! against its current state before acting on it.

use std::{
    sync::mpsc::{Receiver, RecvTimeoutError, Sender, TryRecvError},
    thread::{self, JoinHandle},
    time::Duration,
};

use crate::{
    app::{ComposeError, FinalValueRequest, Ledger},
    networking::NetworkError,
    types::{
        certificates::QuorumCertificate,
        crypto_primitives::Keypair,
        data_types::{Height, Phase, Value},
    },
};

pub(crate) struct FinalizeRequest {
    pub(crate) height: Height,
    pub(crate) phase: Phase,
    pub(crate) value: Value,
    pub(crate) certificate: QuorumCertificate,
}

pub(crate) struct FinalizeOutcome {
    pub(crate) height: Height,
    pub(crate) phase: Phase,
    pub(crate) result: Result<(), FinalizeError>,
}

#[derive(Debug)]
pub enum FinalizeError {
    Compose(ComposeError),
    Broadcast(NetworkError),
}

impl From<ComposeError> for FinalizeError {
    fn from(value: ComposeError) -> Self {
        FinalizeError::Compose(value)
    }
}

impl From<NetworkError> for FinalizeError {
    fn from(value: NetworkError) -> Self {
        FinalizeError::Broadcast(value)
    }
}

pub(crate) struct Finalizer<L: Ledger> {
    ledger: L,
    keypair: Keypair,
    requests: Receiver<FinalizeRequest>,
    outcomes: Sender<FinalizeOutcome>,
    shutdown_signal: Receiver<()>,
}

impl<L: Ledger + 'static> Finalizer<L> {
    pub(crate) fn new(
        ledger: L,
        keypair: Keypair,
        requests: Receiver<FinalizeRequest>,
        outcomes: Sender<FinalizeOutcome>,
        shutdown_signal: Receiver<()>,
    ) -> Self {
        Self {
            ledger,
            keypair,
            requests,
            outcomes,
            shutdown_signal,
        }
    }

    pub(crate) fn start(mut self) -> JoinHandle<()> {
        thread::spawn(move || loop {
            match self.shutdown_signal.try_recv() {
                Ok(()) | Err(TryRecvError::Disconnected) => return,
                Err(TryRecvError::Empty) => (),
            }

            match self.requests.recv_timeout(Duration::from_millis(50)) {
                Ok(request) => {
                    let (height, phase) = (request.height, request.phase);
                    let result = self.finalize(request);
                    if let Err(err) = &result {
                        log::warn!(
                            "Failed to finalize height {}, phase {}: {:?}",
                            height,
                            phase,
                            err
                        );
                    }
                    let outcome = FinalizeOutcome {
                        height,
                        phase,
                        result,
                    };
                    if self.outcomes.send(outcome).is_err() {
                        return;
                    }
                }
                Err(RecvTimeoutError::Timeout) => (),
                Err(RecvTimeoutError::Disconnected) => return,
            }
        })
    }

    fn finalize(&mut self, request: FinalizeRequest) -> Result<(), FinalizeError> {
        let request = FinalValueRequest::new(
            request.height,
            request.phase,
            request.value,
            request.certificate,
        );
        let final_value = self.ledger.compose_final_value(request, &self.keypair)?;
        self.ledger.broadcast_final_value(final_value)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{mpsc, Arc, Mutex};

    use super::*;
    use crate::{
        app::FinalValue,
        types::{crypto_primitives::SigningKey, data_types::Value},
    };

    #[derive(Clone)]
    struct RecordingLedger {
        reject: bool,
        broadcasted: Arc<Mutex<Vec<FinalValue>>>,
    }

    impl Ledger for RecordingLedger {
        fn compose_final_value(
            &mut self,
            request: FinalValueRequest,
            _signer: &Keypair,
        ) -> Result<FinalValue, ComposeError> {
            if self.reject {
                return Err(ComposeError::InvalidCertificate);
            }
            Ok(FinalValue {
                height: request.height(),
                bytes: request.value().bytes().clone(),
            })
        }

        fn broadcast_final_value(&mut self, final_value: FinalValue) -> Result<(), NetworkError> {
            self.broadcasted.lock().unwrap().push(final_value);
            Ok(())
        }
    }

    fn request(height: u64) -> FinalizeRequest {
        let value = Value::new(vec![height as u8]);
        FinalizeRequest {
            height: Height::new(height),
            phase: Phase::new(0),
            certificate: QuorumCertificate {
                height: Height::new(height),
                phase: Phase::new(0),
                value_id: value.id(),
                signatures: Vec::new(),
            },
            value,
        }
    }

    fn run(ledger: RecordingLedger, height: u64) -> FinalizeOutcome {
        let (request_sender, request_receiver) = mpsc::channel();
        let (outcome_sender, outcome_receiver) = mpsc::channel();
        let (shutdown, shutdown_receiver) = mpsc::channel();
        let keypair = Keypair::new(SigningKey::from_bytes(&[5; 32]));
        let finalizer = Finalizer::new(
            ledger,
            keypair,
            request_receiver,
            outcome_sender,
            shutdown_receiver,
        )
        .start();

        request_sender.send(request(height)).unwrap();
        let outcome = outcome_receiver.recv().unwrap();
        shutdown.send(()).unwrap();
        finalizer.join().unwrap();
        outcome
    }

    #[test]
    fn successful_finalization_broadcasts_the_final_value() {
        let broadcasted = Arc::new(Mutex::new(Vec::new()));
        let ledger = RecordingLedger {
            reject: false,
            broadcasted: broadcasted.clone(),
        };

        let outcome = run(ledger, 7);
        assert_eq!(outcome.height, Height::new(7));
        assert!(outcome.result.is_ok());
        assert_eq!(broadcasted.lock().unwrap()[0].height, Height::new(7));
    }

    #[test]
    fn compose_failures_are_reported_back() {
        let broadcasted = Arc::new(Mutex::new(Vec::new()));
        let ledger = RecordingLedger {
            reject: true,
            broadcasted: broadcasted.clone(),
        };

        let outcome = run(ledger, 3);
        assert!(matches!(
            outcome.result,
            Err(FinalizeError::Compose(ComposeError::InvalidCertificate))
        ));
        assert!(broadcasted.lock().unwrap().is_empty());
    }
}
