//! Binary wire primitives for the gossip protocol.
//!
//! All multi-byte integers are big-endian. Variable-length integers follow
//! the Bitcoin-family scheme: values below 0xfd occupy a single byte, larger
//! values are prefixed with 0xfd/0xfe/0xff and carried as 16/32/64-bit
//! fields. Decoding rejects non-minimal encodings so that every value has
//! exactly one wire representation.
//!
//! Encoding writes into in-memory buffers and cannot fail; decoding reads
//! from a [`Reader`] cursor over a byte slice and reports structured errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    /// The input ended in the middle of a field.
    #[error("input truncated: needed {needed} more bytes")]
    Truncated { needed: usize },
    /// A length prefix exceeds the bound imposed by the surrounding field.
    #[error("length {length} exceeds limit of {limit}")]
    TooLarge { length: u64, limit: u64 },
    /// An impossible encoding, e.g. a non-minimal varint.
    #[error("invalid encoding: {0}")]
    Invalid(&'static str),
}

/// Cursor over an in-memory byte slice with structured decode errors.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Consume `n` raw bytes.
    pub fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < n {
            return Err(CodecError::Truncated {
                needed: n - self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// Consume all remaining bytes.
    pub fn take_rest(&mut self) -> &'a [u8] {
        let slice = &self.buf[self.pos..];
        self.pos = self.buf.len();
        slice
    }

    /// Consume a fixed-length byte run, e.g. a 20-byte ripe or 32-byte tag.
    pub fn array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16, CodecError> {
        Ok(u16::from_be_bytes(self.array()?))
    }

    pub fn u32(&mut self) -> Result<u32, CodecError> {
        Ok(u32::from_be_bytes(self.array()?))
    }

    pub fn u64(&mut self) -> Result<u64, CodecError> {
        Ok(u64::from_be_bytes(self.array()?))
    }

    pub fn i32(&mut self) -> Result<i32, CodecError> {
        Ok(i32::from_be_bytes(self.array()?))
    }

    pub fn i64(&mut self) -> Result<i64, CodecError> {
        Ok(i64::from_be_bytes(self.array()?))
    }

    /// Decode a varint, rejecting non-minimal encodings.
    pub fn var_int(&mut self) -> Result<u64, CodecError> {
        let first = self.u8()?;
        match first {
            0xfd => {
                let value = u64::from(self.u16()?);
                if value < 0xfd {
                    return Err(CodecError::Invalid("non-minimal varint"));
                }
                Ok(value)
            }
            0xfe => {
                let value = u64::from(self.u32()?);
                if value <= u64::from(u16::MAX) {
                    return Err(CodecError::Invalid("non-minimal varint"));
                }
                Ok(value)
            }
            0xff => {
                let value = self.u64()?;
                if value <= u64::from(u32::MAX) {
                    return Err(CodecError::Invalid("non-minimal varint"));
                }
                Ok(value)
            }
            byte => Ok(u64::from(byte)),
        }
    }

    /// Decode a varint-prefixed byte run, bounded by `limit`.
    pub fn var_bytes(&mut self, limit: usize) -> Result<Vec<u8>, CodecError> {
        let length = self.var_int()?;
        if length > limit as u64 {
            return Err(CodecError::TooLarge {
                length,
                limit: limit as u64,
            });
        }
        Ok(self.take(length as usize)?.to_vec())
    }

    /// Decode a varint-prefixed UTF-8 string, bounded by `limit`.
    pub fn var_string(&mut self, limit: usize) -> Result<String, CodecError> {
        let bytes = self.var_bytes(limit)?;
        String::from_utf8(bytes).map_err(|_| CodecError::Invalid("string is not UTF-8"))
    }

    /// Decode a varint count followed by that many varints.
    pub fn var_int_list(&mut self, limit: usize) -> Result<Vec<u64>, CodecError> {
        let count = self.var_int()?;
        if count > limit as u64 {
            return Err(CodecError::TooLarge {
                length: count,
                limit: limit as u64,
            });
        }
        let mut values = Vec::with_capacity(count as usize);
        for _ in 0..count {
            values.push(self.var_int()?);
        }
        Ok(values)
    }
}

/// Encoders appending to an in-memory buffer.
pub mod encode {
    pub fn u16(value: u16, out: &mut Vec<u8>) {
        out.extend_from_slice(&value.to_be_bytes());
    }

    pub fn u32(value: u32, out: &mut Vec<u8>) {
        out.extend_from_slice(&value.to_be_bytes());
    }

    pub fn u64(value: u64, out: &mut Vec<u8>) {
        out.extend_from_slice(&value.to_be_bytes());
    }

    pub fn i32(value: i32, out: &mut Vec<u8>) {
        out.extend_from_slice(&value.to_be_bytes());
    }

    pub fn i64(value: i64, out: &mut Vec<u8>) {
        out.extend_from_slice(&value.to_be_bytes());
    }

    pub fn var_int(value: u64, out: &mut Vec<u8>) {
        if value < 0xfd {
            out.push(value as u8);
        } else if value <= u64::from(u16::MAX) {
            out.push(0xfd);
            u16(value as u16, out);
        } else if value <= u64::from(u32::MAX) {
            out.push(0xfe);
            u32(value as u32, out);
        } else {
            out.push(0xff);
            u64(value, out);
        }
    }

    pub fn var_bytes(bytes: &[u8], out: &mut Vec<u8>) {
        var_int(bytes.len() as u64, out);
        out.extend_from_slice(bytes);
    }

    pub fn var_string(value: &str, out: &mut Vec<u8>) {
        var_bytes(value.as_bytes(), out);
    }

    pub fn var_int_list(values: &[u64], out: &mut Vec<u8>) {
        var_int(values.len() as u64, out);
        for &value in values {
            var_int(value, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(value: u64) -> Vec<u8> {
        let mut buf = Vec::new();
        encode::var_int(value, &mut buf);
        let mut reader = Reader::new(&buf);
        assert_eq!(reader.var_int().expect("decode"), value);
        assert!(reader.is_empty());
        buf
    }

    #[test]
    fn var_int_round_trips_at_boundaries() {
        assert_eq!(round_trip(0).len(), 1);
        assert_eq!(round_trip(0xfc).len(), 1);
        assert_eq!(round_trip(0xfd).len(), 3);
        assert_eq!(round_trip(0xffff).len(), 3);
        assert_eq!(round_trip(0x1_0000).len(), 5);
        assert_eq!(round_trip(u64::from(u32::MAX)).len(), 5);
        assert_eq!(round_trip(u64::from(u32::MAX) + 1).len(), 9);
        assert_eq!(round_trip(u64::MAX).len(), 9);
    }

    #[test]
    fn var_int_rejects_non_minimal_encodings() {
        for bad in [
            &[0xfd, 0x00, 0x10][..],
            &[0xfe, 0x00, 0x00, 0xff, 0xff][..],
            &[0xff, 0x00, 0x00, 0x00, 0x00, 0xff, 0xff, 0xff, 0xff][..],
        ] {
            let mut reader = Reader::new(bad);
            assert!(matches!(reader.var_int(), Err(CodecError::Invalid(_))));
        }
    }

    #[test]
    fn var_int_reports_truncation() {
        let mut reader = Reader::new(&[0xfd, 0x01]);
        assert!(matches!(
            reader.var_int(),
            Err(CodecError::Truncated { .. })
        ));
    }

    #[test]
    fn fixed_width_integers_round_trip() {
        let mut buf = Vec::new();
        encode::u16(0xbeef, &mut buf);
        encode::u32(0xdead_beef, &mut buf);
        encode::i64(-42, &mut buf);
        let mut reader = Reader::new(&buf);
        assert_eq!(reader.u16().expect("u16"), 0xbeef);
        assert_eq!(reader.u32().expect("u32"), 0xdead_beef);
        assert_eq!(reader.i64().expect("i64"), -42);
        assert!(reader.is_empty());
    }

    #[test]
    fn var_bytes_enforce_limit() {
        let mut buf = Vec::new();
        encode::var_bytes(&[7u8; 80], &mut buf);
        let mut reader = Reader::new(&buf);
        assert!(matches!(
            reader.var_bytes(64),
            Err(CodecError::TooLarge { length: 80, .. })
        ));

        let mut reader = Reader::new(&buf);
        assert_eq!(reader.var_bytes(128).expect("decode"), vec![7u8; 80]);
    }

    #[test]
    fn var_string_rejects_invalid_utf8() {
        let mut buf = Vec::new();
        encode::var_bytes(&[0xff, 0xfe], &mut buf);
        let mut reader = Reader::new(&buf);
        assert!(matches!(
            reader.var_string(16),
            Err(CodecError::Invalid(_))
        ));
    }

    #[test]
    fn var_int_list_round_trips() {
        let values = vec![1, 2, 0xfd00, u64::from(u32::MAX) + 7];
        let mut buf = Vec::new();
        encode::var_int_list(&values, &mut buf);
        let mut reader = Reader::new(&buf);
        assert_eq!(reader.var_int_list(8).expect("decode"), values);
    }

    #[test]
    fn array_reads_fixed_runs() {
        let mut reader = Reader::new(&[1, 2, 3, 4, 5]);
        let head: [u8; 3] = reader.array().expect("array");
        assert_eq!(head, [1, 2, 3]);
        assert_eq!(reader.remaining(), 2);
        assert!(matches!(
            reader.array::<4>(),
            Err(CodecError::Truncated { needed: 2 })
        ));
    }
}
