//! Proof-of-work target arithmetic and nonce search.
//!
//! The stamp covers `nonce ‖ sha512(payload_without_nonce)`. The difficulty
//! target scales with the payload size and its remaining time to live, so
//! long-lived objects cost proportionally more work.

use crate::{double_sha512, sha512, CryptoError};

/// Seconds-based Unix timestamp.
fn unix_now() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_secs() as i64,
        Err(_) => 0,
    }
}

/// Difficulty target for a payload of `payload_length` bytes (nonce included)
/// living for `ttl_seconds`.
pub fn target(
    payload_length: u64,
    ttl_seconds: i64,
    nonce_trials_per_byte: u64,
    extra_bytes: u64,
) -> u64 {
    let ttl = ttl_seconds.max(0) as u128;
    let weight = u128::from(payload_length) + u128::from(extra_bytes);
    let divisor = u128::from(nonce_trials_per_byte.max(1))
        * (weight + (ttl * weight) / (1 << 16));
    let target = (1u128 << 64) / divisor.max(1);
    u64::try_from(target).unwrap_or(u64::MAX)
}

/// The 64-bit work value a nonce produces for the given payload.
pub fn value(nonce: [u8; 8], payload_without_nonce: &[u8]) -> u64 {
    let initial = sha512(&[payload_without_nonce]);
    let digest = double_sha512(&[&nonce, &initial]);
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(head)
}

/// Verify that `nonce` satisfies the difficulty for the payload.
pub fn check(
    nonce: [u8; 8],
    payload_without_nonce: &[u8],
    expires_time: i64,
    nonce_trials_per_byte: u64,
    extra_bytes: u64,
) -> Result<(), CryptoError> {
    let ttl = expires_time - unix_now();
    let target = target(
        payload_without_nonce.len() as u64 + 8,
        ttl,
        nonce_trials_per_byte,
        extra_bytes,
    );
    let value = value(nonce, payload_without_nonce);
    if value <= target {
        Ok(())
    } else {
        Err(CryptoError::InsufficientProofOfWork { value, target })
    }
}

/// Incrementally bump the nonce until a valid stamp is found.
pub fn search(
    payload_without_nonce: &[u8],
    expires_time: i64,
    nonce_trials_per_byte: u64,
    extra_bytes: u64,
) -> [u8; 8] {
    let ttl = expires_time - unix_now();
    let target = target(
        payload_without_nonce.len() as u64 + 8,
        ttl,
        nonce_trials_per_byte,
        extra_bytes,
    );
    let initial = sha512(&[payload_without_nonce]);
    let mut nonce = 0u64;
    loop {
        let candidate = nonce.to_be_bytes();
        let digest = double_sha512(&[&candidate, &initial]);
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        if u64::from_be_bytes(head) <= target {
            return candidate;
        }
        nonce = nonce.wrapping_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EASY_TRIALS: u64 = 1;
    const EXTRA: u64 = 20;

    fn soon() -> i64 {
        unix_now() + 300
    }

    #[test]
    fn target_shrinks_with_difficulty_and_ttl() {
        let base = target(200, 300, 1_000, 1_000);
        assert!(target(200, 300, 2_000, 1_000) < base);
        assert!(target(200, 30_000, 1_000, 1_000) < base);
        assert!(target(400, 300, 1_000, 1_000) < base);
    }

    #[test]
    fn searched_nonce_passes_check() {
        let payload = b"an object payload".to_vec();
        let expires = soon();
        let nonce = search(&payload, expires, EASY_TRIALS, EXTRA);
        check(nonce, &payload, expires, EASY_TRIALS, EXTRA).expect("stamp is valid");
    }

    #[test]
    fn check_rejects_wrong_difficulty() {
        let payload = b"an object payload".to_vec();
        let expires = soon();
        let nonce = search(&payload, expires, EASY_TRIALS, EXTRA);
        let result = check(nonce, &payload, expires, 1_000_000_000, EXTRA);
        assert!(matches!(
            result,
            Err(CryptoError::InsufficientProofOfWork { .. })
        ));
    }

    #[test]
    fn value_changes_with_nonce() {
        let payload = b"payload";
        assert_ne!(
            value([0; 8], payload),
            value([0, 0, 0, 0, 0, 0, 0, 1], payload)
        );
    }
}
