use std::fmt;

use codec::{CodecError, Reader};

/// Content address of an object: the truncated double-SHA-512 of
/// `nonce ‖ payload_bytes_without_nonce`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InventoryVector([u8; 32]);

impl InventoryVector {
    pub const LENGTH: usize = 32;

    pub fn new(hash: [u8; 32]) -> Self {
        Self(hash)
    }

    /// Compute the vector for a stamped object.
    pub fn compute(nonce: [u8; 8], payload_without_nonce: &[u8]) -> Self {
        let digest = crypto::double_sha512(&[&nonce, payload_without_nonce]);
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&digest[..32]);
        Self(hash)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn read(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self(reader.array()?))
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.0);
    }
}

impl fmt::Display for InventoryVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

// Debug prints the same hex as Display; a 32-byte array dump is useless in logs.
impl fmt::Debug for InventoryVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}
