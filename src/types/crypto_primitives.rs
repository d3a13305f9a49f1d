/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Cryptographic primitives.
//!
//! The definitions and re-exports in this module provide two categories of cryptographic primitives:
//! 1. **Cryptographic Hashes**: provided by the [`sha2`] crate.
//! 2. **Digital Signatures**: provided by the [`ed25519_dalek`] crate.

use super::data_types::{Address, SignatureBytes, ValueId};

// re-exports below.
pub use sha2::Digest;
pub use sha2::Sha256 as CryptoHasher;

pub use ed25519_dalek::{Signature, SignatureError, Signer, SigningKey, Verifier, VerifyingKey};

/// A facade around [`SigningKey`] that signs on behalf of a coordinator and exposes the coordinator's
/// [`address`](Self::address).
#[derive(Clone)]
pub struct Keypair(SigningKey);

impl Keypair {
    /// Create a `Keypair` that wraps over `signing_key`.
    pub fn new(signing_key: SigningKey) -> Keypair {
        Keypair(signing_key)
    }

    /// Sign an arbitrary `message` with the `Keypair`.
    pub fn sign(&self, message: &[u8]) -> SignatureBytes {
        SignatureBytes::new(self.0.sign(message).to_bytes())
    }

    /// Sign `value_id` as a coordinator. This is the signature that proposals carry and that
    /// approving precommits contribute to a quorum certificate.
    pub fn sign_as_coordinator(&self, value_id: &ValueId) -> SignatureBytes {
        self.sign(&value_id.bytes())
    }

    /// Get the `VerifyingKey` of this `Keypair`.
    pub fn public(&self) -> VerifyingKey {
        self.0.verifying_key()
    }

    /// Get the coordinator address of this `Keypair`.
    pub fn address(&self) -> Address {
        Address::from(self.public())
    }
}

/// Check that `signature` is a signature by `signer` over `value_id`, as produced by
/// [`Keypair::sign_as_coordinator`].
pub fn is_coordinator_signature(
    signer: &Address,
    value_id: &ValueId,
    signature: &SignatureBytes,
) -> bool {
    match signer.verifying_key() {
        Ok(verifying_key) => verifying_key
            .verify(&value_id.bytes(), &Signature::from_bytes(&signature.bytes()))
            .is_ok(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::data_types::Value;

    #[test]
    fn coordinator_signature_verifies_only_for_signed_value() {
        let keypair = Keypair::new(SigningKey::from_bytes(&[7u8; 32]));
        let value_id = Value::new(b"anchor".to_vec()).id();
        let other_id = Value::new(b"other".to_vec()).id();
        let signature = keypair.sign_as_coordinator(&value_id);

        assert!(is_coordinator_signature(&keypair.address(), &value_id, &signature));
        assert!(!is_coordinator_signature(&keypair.address(), &other_id, &signature));

        let stranger = Keypair::new(SigningKey::from_bytes(&[8u8; 32]));
        assert!(!is_coordinator_signature(&stranger.address(), &value_id, &signature));
    }
}
