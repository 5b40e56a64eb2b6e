//! Hashing, proof-of-work and the pluggable cryptography capability.
//!
//! The network core never talks to a concrete cipher suite. Hashing and the
//! proof-of-work arithmetic are deterministic and exposed as plain functions;
//! everything that involves key material sits behind the [`Cryptography`]
//! trait so that nodes can be wired with a production backend while tests run
//! against the deterministic stub in [`stub`].

pub mod pow;
pub mod stub;

use sha2::{Digest, Sha512};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    /// The object's nonce does not satisfy the required difficulty.
    #[error("insufficient proof of work: value {value:#018x} exceeds target {target:#018x}")]
    InsufficientProofOfWork { value: u64, target: u64 },
    /// The ciphertext could not be opened with the supplied key.
    #[error("decryption failed")]
    DecryptionFailed,
}

/// SHA-512 over the concatenation of `parts`.
pub fn sha512(parts: &[&[u8]]) -> [u8; 64] {
    let mut hasher = Sha512::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// SHA-512 of the SHA-512 of the concatenation of `parts`.
pub fn double_sha512(parts: &[&[u8]]) -> [u8; 64] {
    let inner = sha512(parts);
    sha512(&[&inner])
}

/// Key-dependent operations, injected into every subsystem at construction.
///
/// The concrete curve and cipher construction are supplied by implementors;
/// the proof-of-work methods have canonical implementations that every
/// backend shares so that senders and verifiers agree on difficulty.
pub trait Cryptography: Send + Sync {
    /// Fresh random nonce for the version handshake.
    fn random_nonce(&self) -> u64;

    /// Detached signature over `data` with the private signing key.
    fn sign(&self, data: &[u8], private_signing_key: &[u8]) -> Vec<u8>;

    /// Verify a detached signature against a 64-byte public signing key.
    fn verify(&self, data: &[u8], signature: &[u8], public_signing_key: &[u8; 64]) -> bool;

    /// Seal `plain` to the holder of the matching private encryption key.
    fn encrypt(&self, plain: &[u8], public_encryption_key: &[u8; 64]) -> Vec<u8>;

    /// Open a ciphertext produced by [`Cryptography::encrypt`].
    fn decrypt(&self, cipher: &[u8], private_encryption_key: &[u8])
        -> Result<Vec<u8>, CryptoError>;

    /// Admission gate: verify the nonce stamped on an object.
    ///
    /// `payload` is the object's payload bytes without the nonce.
    fn check_proof_of_work(
        &self,
        nonce: [u8; 8],
        payload: &[u8],
        expires_time: i64,
        nonce_trials_per_byte: u64,
        extra_bytes: u64,
    ) -> Result<(), CryptoError> {
        pow::check(nonce, payload, expires_time, nonce_trials_per_byte, extra_bytes)
    }

    /// Search for a nonce satisfying the difficulty parameters.
    fn do_proof_of_work(
        &self,
        payload: &[u8],
        expires_time: i64,
        nonce_trials_per_byte: u64,
        extra_bytes: u64,
    ) -> [u8; 8] {
        pow::search(payload, expires_time, nonce_trials_per_byte, extra_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha512_concatenates_parts() {
        let joined = sha512(&[b"hello ", b"world"]);
        let whole = sha512(&[b"hello world"]);
        assert_eq!(joined, whole);
    }

    #[test]
    fn double_sha512_differs_from_single() {
        assert_ne!(sha512(&[b"x"]), double_sha512(&[b"x"]));
    }
}
