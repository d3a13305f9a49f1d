use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

use anchor_bft::{
    app::{
        App, AppError, CommitteeResolution, Committees, ComposeCandidateRequest, ComposeError,
        FinalValue, FinalValueRequest, Ledger, ValidateValueRequest, ValidateValueResponse,
    },
    networking::NetworkError,
    types::{
        committee::Committee,
        crypto_primitives::Keypair,
        data_types::{EpochRound, Height, Value},
    },
};

/// The committee of every height is the same list of coordinators.
#[derive(Clone)]
pub(crate) struct StaticCommittees {
    committee: Committee,
}

impl StaticCommittees {
    pub(crate) fn new(committee: Committee) -> Self {
        Self { committee }
    }
}

impl Committees for StaticCommittees {
    fn resolve_committee(&mut self, height: Height) -> CommitteeResolution {
        CommitteeResolution::Resolved {
            epoch_round: EpochRound::new(height.int()),
            committee: self.committee.clone(),
        }
    }
}

/// An app whose candidates name the proposing coordinator and the height, and which rejects empty
/// values.
pub(crate) struct AnchorApp {
    tag: u8,
}

impl AnchorApp {
    pub(crate) fn new(tag: u8) -> Self {
        Self { tag }
    }
}

impl App for AnchorApp {
    fn compose_candidate_value(
        &mut self,
        request: ComposeCandidateRequest,
        _signer: &Keypair,
    ) -> Result<Value, AppError> {
        let mut bytes = vec![self.tag];
        bytes.extend_from_slice(&request.height().int().to_le_bytes());
        Ok(Value::new(bytes))
    }

    fn validate_value(&mut self, request: ValidateValueRequest) -> ValidateValueResponse {
        if request.value().bytes().is_empty() {
            ValidateValueResponse::Invalid
        } else {
            ValidateValueResponse::Valid
        }
    }
}

#[derive(Default)]
struct LedgerState {
    final_values: BTreeMap<Height, FinalValue>,
    conflicts: Vec<Height>,
}

/// A ledger shared by every coordinator, which checks quorum certificates and remembers the final
/// value of every height.
#[derive(Clone)]
pub(crate) struct SharedLedger {
    committee: Committee,
    state: Arc<Mutex<LedgerState>>,
}

impl SharedLedger {
    pub(crate) fn new(committee: Committee) -> Self {
        Self {
            committee,
            state: Arc::new(Mutex::new(LedgerState::default())),
        }
    }

    pub(crate) fn final_values(&self) -> BTreeMap<Height, FinalValue> {
        self.state.lock().unwrap().final_values.clone()
    }

    /// Heights for which two different final values were broadcast.
    pub(crate) fn conflicts(&self) -> Vec<Height> {
        self.state.lock().unwrap().conflicts.clone()
    }
}

impl Ledger for SharedLedger {
    fn compose_final_value(
        &mut self,
        request: FinalValueRequest,
        _signer: &Keypair,
    ) -> Result<FinalValue, ComposeError> {
        if !request.certificate().is_correct(&self.committee)
            || request.certificate().value_id != request.value().id()
        {
            return Err(ComposeError::InvalidCertificate);
        }

        Ok(FinalValue {
            height: request.height(),
            bytes: request.value().bytes().clone(),
        })
    }

    fn broadcast_final_value(&mut self, final_value: FinalValue) -> Result<(), NetworkError> {
        let mut state = self.state.lock().unwrap();
        match state.final_values.get(&final_value.height) {
            Some(existing) if *existing != final_value => {
                let height = final_value.height;
                state.conflicts.push(height)
            }
            Some(_) => (),
            None => {
                state.final_values.insert(final_value.height, final_value);
            }
        }
        Ok(())
    }
}
