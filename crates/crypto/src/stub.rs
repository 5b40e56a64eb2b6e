//! Deterministic stand-in for the production cipher suite.
//!
//! Signatures are keyed BLAKE3 tags and "encryption" is a BLAKE3 XOF
//! keystream with a MAC prefix. Public keys are derived by hashing the
//! private half, so any byte string works as a private key. This is not
//! cryptography; it exists so that tests and demos can exercise the full
//! sign / encrypt / proof-of-work pipeline without an ECC backend.

use rand::rngs::OsRng;
use rand::RngCore;

use crate::{CryptoError, Cryptography};

const SIGNING_CONTEXT: &str = "object-gossip stub signing key";
const ENCRYPTION_CONTEXT: &str = "object-gossip stub encryption key";
const MAC_LEN: usize = 32;

/// A private/public pair understood by [`StubCryptography`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StubKeyPair {
    pub private_signing: [u8; 32],
    pub private_encryption: [u8; 32],
    pub public_signing: [u8; 64],
    pub public_encryption: [u8; 64],
}

impl StubKeyPair {
    /// Derive a key pair from a seed. Equal seeds yield equal pairs.
    pub fn from_seed(seed: u64) -> Self {
        let mut private_signing = [0u8; 32];
        let mut private_encryption = [0u8; 32];
        private_signing[..8].copy_from_slice(&seed.to_be_bytes());
        private_signing[8] = 0x01;
        private_encryption[..8].copy_from_slice(&seed.to_be_bytes());
        private_encryption[8] = 0x02;
        Self {
            public_signing: derive_public(SIGNING_CONTEXT, &private_signing),
            public_encryption: derive_public(ENCRYPTION_CONTEXT, &private_encryption),
            private_signing,
            private_encryption,
        }
    }
}

fn derive_public(context: &str, private_key: &[u8]) -> [u8; 64] {
    let mut out = [0u8; 64];
    let key = blake3::derive_key(context, private_key);
    blake3::Hasher::new_keyed(&key)
        .finalize_xof()
        .fill(&mut out);
    out
}

fn tag(key: &[u8; 32], data: &[u8]) -> [u8; 32] {
    *blake3::Hasher::new_keyed(key)
        .update(data)
        .finalize()
        .as_bytes()
}

fn keystream(key: &[u8; 32], len: usize) -> Vec<u8> {
    let mut stream = vec![0u8; len];
    blake3::Hasher::new_keyed(key)
        .update(b"keystream")
        .finalize_xof()
        .fill(&mut stream);
    stream
}

fn half(public_key: &[u8; 64]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&public_key[..32]);
    out
}

/// See the module docs: deterministic, keyless of any real security.
#[derive(Clone, Copy, Debug, Default)]
pub struct StubCryptography;

impl Cryptography for StubCryptography {
    fn random_nonce(&self) -> u64 {
        OsRng.next_u64()
    }

    fn sign(&self, data: &[u8], private_signing_key: &[u8]) -> Vec<u8> {
        let public = derive_public(SIGNING_CONTEXT, private_signing_key);
        tag(&half(&public), data).to_vec()
    }

    fn verify(&self, data: &[u8], signature: &[u8], public_signing_key: &[u8; 64]) -> bool {
        signature == tag(&half(public_signing_key), data)
    }

    fn encrypt(&self, plain: &[u8], public_encryption_key: &[u8; 64]) -> Vec<u8> {
        let key = half(public_encryption_key);
        let mut cipher = Vec::with_capacity(MAC_LEN + plain.len());
        cipher.extend_from_slice(&tag(&key, plain));
        let stream = keystream(&key, plain.len());
        cipher.extend(plain.iter().zip(stream).map(|(byte, mask)| byte ^ mask));
        cipher
    }

    fn decrypt(
        &self,
        cipher: &[u8],
        private_encryption_key: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        if cipher.len() < MAC_LEN {
            return Err(CryptoError::DecryptionFailed);
        }
        let public = derive_public(ENCRYPTION_CONTEXT, private_encryption_key);
        let key = half(&public);
        let (mac, body) = cipher.split_at(MAC_LEN);
        let stream = keystream(&key, body.len());
        let plain: Vec<u8> = body.iter().zip(stream).map(|(byte, mask)| byte ^ mask).collect();
        if mac != tag(&key, &plain) {
            return Err(CryptoError::DecryptionFailed);
        }
        Ok(plain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signatures_verify_with_matching_public_key() {
        let crypto = StubCryptography;
        let keys = StubKeyPair::from_seed(7);
        let signature = crypto.sign(b"data", &keys.private_signing);
        assert!(crypto.verify(b"data", &signature, &keys.public_signing));
        assert!(!crypto.verify(b"other", &signature, &keys.public_signing));

        let strangers = StubKeyPair::from_seed(8);
        assert!(!crypto.verify(b"data", &signature, &strangers.public_signing));
    }

    #[test]
    fn encryption_round_trips() {
        let crypto = StubCryptography;
        let keys = StubKeyPair::from_seed(42);
        let cipher = crypto.encrypt(b"the plaintext", &keys.public_encryption);
        assert_ne!(&cipher[MAC_LEN..], b"the plaintext");
        let plain = crypto
            .decrypt(&cipher, &keys.private_encryption)
            .expect("decrypt");
        assert_eq!(plain, b"the plaintext");
    }

    #[test]
    fn decrypt_with_wrong_key_fails() {
        let crypto = StubCryptography;
        let keys = StubKeyPair::from_seed(1);
        let wrong = StubKeyPair::from_seed(2);
        let cipher = crypto.encrypt(b"secret", &keys.public_encryption);
        assert!(matches!(
            crypto.decrypt(&cipher, &wrong.private_encryption),
            Err(CryptoError::DecryptionFailed)
        ));
    }

    #[test]
    fn key_derivation_is_deterministic() {
        assert_eq!(StubKeyPair::from_seed(5), StubKeyPair::from_seed(5));
        assert_ne!(
            StubKeyPair::from_seed(5).public_signing,
            StubKeyPair::from_seed(6).public_signing
        );
    }
}
