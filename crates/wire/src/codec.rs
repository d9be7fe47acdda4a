use crate::{Error, Result};
use bytes::{BufMut, Bytes, BytesMut};

/// Encoder appends wire primitives onto a growable byte buffer.
pub struct Encoder {
    buf: BytesMut,
}

impl Encoder {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Freeze the accumulated encoding into an immutable buffer.
    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    pub fn put_bool(&mut self, v: bool) {
        self.buf.put_u8(v as u8);
    }

    /// Append an unsigned integer as a base-128 varint (LEB128).
    pub fn put_uvarint(&mut self, mut v: u64) {
        while v >= 0x80 {
            self.buf.put_u8((v as u8 & 0x7f) | 0x80);
            v >>= 7;
        }
        self.buf.put_u8(v as u8);
    }

    /// Append a signed integer as a zig-zag varint, so that values of small
    /// magnitude (including the negative sentinels) stay short on the wire.
    pub fn put_varint(&mut self, v: i64) {
        self.put_uvarint(((v << 1) ^ (v >> 63)) as u64);
    }

    /// Append a float as its fixed eight-byte little-endian bit pattern,
    /// preserving it exactly (including NaN payloads).
    pub fn put_f64(&mut self, v: f64) {
        self.buf.put_u64_le(v.to_bits());
    }

    /// Append a length-prefixed UTF-8 string.
    pub fn put_str(&mut self, v: &str) {
        self.put_uvarint(v.len() as u64);
        self.buf.put_slice(v.as_bytes());
    }

    /// Append a length-prefixed byte blob.
    pub fn put_bytes(&mut self, v: &[u8]) {
        self.put_uvarint(v.len() as u64);
        self.buf.put_slice(v);
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Decoder reads wire primitives from a borrowed input slice.
/// Strings and blobs are returned as sub-slices of the input.
pub struct Decoder<'i> {
    input: &'i [u8],
}

impl<'i> Decoder<'i> {
    pub fn new(input: &'i [u8]) -> Self {
        Self { input }
    }

    pub fn remaining(&self) -> usize {
        self.input.len()
    }

    /// Assert the input was fully consumed.
    pub fn finish(self) -> Result<()> {
        if self.input.is_empty() {
            Ok(())
        } else {
            Err(Error::TrailingInput {
                trailing: self.input.len(),
            })
        }
    }

    pub fn u8(&mut self) -> Result<u8> {
        let (&first, rest) = self.input.split_first().ok_or(Error::Truncated {
            needed: 1,
            remaining: 0,
        })?;
        self.input = rest;
        Ok(first)
    }

    pub fn bool(&mut self) -> Result<bool> {
        Ok(self.u8()? != 0)
    }

    pub fn uvarint(&mut self) -> Result<u64> {
        let mut v = 0u64;
        for shift in 0..10 {
            let b = self.u8()?;

            if shift == 9 && b > 1 {
                return Err(Error::VarintOverflow);
            }
            v |= ((b & 0x7f) as u64) << (shift * 7);

            if b < 0x80 {
                return Ok(v);
            }
        }
        Err(Error::VarintOverflow)
    }

    pub fn varint(&mut self) -> Result<i64> {
        let v = self.uvarint()?;
        Ok(((v >> 1) as i64) ^ -((v & 1) as i64))
    }

    fn take(&mut self, length: u64) -> Result<&'i [u8]> {
        if length > self.input.len() as u64 {
            return Err(Error::LengthOverrun {
                length,
                remaining: self.input.len(),
            });
        }
        let (head, rest) = self.input.split_at(length as usize);
        self.input = rest;
        Ok(head)
    }

    pub fn f64(&mut self) -> Result<f64> {
        let raw = self.take(8).map_err(|_| Error::Truncated {
            needed: 8,
            remaining: self.input.len(),
        })?;
        let mut bits = [0u8; 8];
        bits.copy_from_slice(raw);
        Ok(f64::from_bits(u64::from_le_bytes(bits)))
    }

    pub fn str(&mut self) -> Result<&'i str> {
        let length = self.uvarint()?;
        Ok(std::str::from_utf8(self.take(length)?)?)
    }

    pub fn bytes(&mut self) -> Result<&'i [u8]> {
        let length = self.uvarint()?;
        self.take(length)
    }
}
