//! Big-endian encoding helpers for the persisted entity layout.
//!
//! All persisted values are concatenations of fixed-width big-endian fields;
//! lists are prefixed with a `u32` element count. [`ByteWriter`] builds such
//! values, [`ByteReader`] consumes them with truncation checks.

use crate::error::{StoreError, StoreResult};

/// Append-only builder for the persisted layout.
#[derive(Default)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a writer with pre-allocated capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn put_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn put_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn put_u64(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    /// Append a fixed 32-byte field (an id or a color token).
    pub fn put_bytes32(&mut self, bytes: &[u8; 32]) {
        self.buf.extend_from_slice(bytes);
    }

    /// The encoded bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Cursor over a persisted value.
pub struct ByteReader<'a> {
    bucket: &'static str,
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    /// Create a reader over `data`; `bucket` names the source in errors.
    pub fn new(bucket: &'static str, data: &'a [u8]) -> Self {
        Self {
            bucket,
            data,
            pos: 0,
        }
    }

    fn take(&mut self, len: usize) -> StoreResult<&'a [u8]> {
        if self.pos + len > self.data.len() {
            return Err(StoreError::Corrupt {
                bucket: self.bucket,
                reason: format!(
                    "truncated value: need {} bytes at offset {}, have {}",
                    len,
                    self.pos,
                    self.data.len() - self.pos
                ),
            });
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn take_u8(&mut self) -> StoreResult<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn take_u32(&mut self) -> StoreResult<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes(bytes.try_into().expect("4-byte slice")))
    }

    pub fn take_u64(&mut self) -> StoreResult<u64> {
        let bytes = self.take(8)?;
        Ok(u64::from_be_bytes(bytes.try_into().expect("8-byte slice")))
    }

    /// Read a fixed 32-byte field.
    pub fn take_bytes32(&mut self) -> StoreResult<[u8; 32]> {
        let bytes = self.take(32)?;
        Ok(bytes.try_into().expect("32-byte slice"))
    }

    /// Assert that the value has been fully consumed.
    pub fn expect_end(&self) -> StoreResult<()> {
        if self.pos != self.data.len() {
            return Err(StoreError::Corrupt {
                bucket: self.bucket,
                reason: format!(
                    "{} trailing bytes after decoded value",
                    self.data.len() - self.pos
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_roundtrip() {
        let mut writer = ByteWriter::new();
        writer.put_u8(0xAB);
        writer.put_u32(0xDEAD_BEEF);
        writer.put_u64(42);
        writer.put_bytes32(&[7u8; 32]);
        let bytes = writer.into_bytes();
        assert_eq!(bytes.len(), 1 + 4 + 8 + 32);

        let mut reader = ByteReader::new("test", &bytes);
        assert_eq!(reader.take_u8().unwrap(), 0xAB);
        assert_eq!(reader.take_u32().unwrap(), 0xDEAD_BEEF);
        assert_eq!(reader.take_u64().unwrap(), 42);
        assert_eq!(reader.take_bytes32().unwrap(), [7u8; 32]);
        reader.expect_end().unwrap();
    }

    #[test]
    fn encoding_is_big_endian() {
        let mut writer = ByteWriter::new();
        writer.put_u32(1);
        assert_eq!(writer.into_bytes(), vec![0, 0, 0, 1]);
    }

    #[test]
    fn truncated_read_is_rejected() {
        let mut reader = ByteReader::new("test", &[0, 0]);
        let err = reader.take_u32().unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { bucket: "test", .. }));
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut reader = ByteReader::new("test", &[1, 2, 3]);
        reader.take_u8().unwrap();
        assert!(reader.expect_end().is_err());
    }
}
