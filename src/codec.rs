//! Binary encoding shared by every filter.
//!
//! A filter is written as a two byte preamble (family, serial version), its
//! configuration scalars as big-endian `u64`s in a fixed order, and then its raw
//! backing bytes, each buffer prefixed with its length.

use crate::error::DecodeError;
use alloc::vec::Vec;

pub(crate) const SERIAL_VERSION: u8 = 1;

/// Identifies which filter produced a byte stream.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub(crate) enum Family {
    Stable = 1,
    Classic = 2,
    Partitioned = 3,
    #[cfg_attr(not(feature = "std"), allow(dead_code))]
    Inverse = 4,
}

/// Appends big-endian fields to a growing buffer.
pub(crate) struct FilterBytes {
    bytes: Vec<u8>,
}

impl FilterBytes {
    /// Starts a buffer with the preamble for `family`.
    pub(crate) fn new(family: Family, capacity: usize) -> Self {
        let mut bytes = Vec::with_capacity(capacity + 2);
        bytes.push(family as u8);
        bytes.push(SERIAL_VERSION);
        Self { bytes }
    }

    pub(crate) fn write_u8(&mut self, n: u8) {
        self.bytes.push(n);
    }

    pub(crate) fn write_u64(&mut self, n: u64) {
        self.bytes.extend_from_slice(&n.to_be_bytes());
    }

    /// Writes a length-prefixed buffer.
    pub(crate) fn write_buffer(&mut self, buf: &[u8]) {
        self.write_u64(buf.len() as u64);
        self.bytes.extend_from_slice(buf);
    }

    pub(crate) fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Reads fields written by [`FilterBytes`], failing instead of panicking on short input.
pub(crate) struct FilterSlice<'a> {
    slice: &'a [u8],
}

impl<'a> FilterSlice<'a> {
    /// Checks the preamble and returns a reader positioned after it.
    pub(crate) fn new(slice: &'a [u8], family: Family) -> Result<Self, DecodeError> {
        let mut reader = Self { slice };
        let actual = reader.read_u8("family")?;
        if actual != family as u8 {
            return Err(DecodeError::InvalidFamily {
                expected: family as u8,
                actual,
            });
        }
        let version = reader.read_u8("serial version")?;
        if version != SERIAL_VERSION {
            return Err(DecodeError::UnsupportedVersion {
                expected: SERIAL_VERSION,
                actual: version,
            });
        }
        Ok(reader)
    }

    fn take(&mut self, n: usize, what: &'static str) -> Result<&'a [u8], DecodeError> {
        if self.slice.len() < n {
            return Err(DecodeError::InsufficientData(what));
        }
        let (head, tail) = self.slice.split_at(n);
        self.slice = tail;
        Ok(head)
    }

    pub(crate) fn read_u8(&mut self, what: &'static str) -> Result<u8, DecodeError> {
        Ok(self.take(1, what)?[0])
    }

    pub(crate) fn read_u64(&mut self, what: &'static str) -> Result<u64, DecodeError> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8, what)?);
        Ok(u64::from_be_bytes(buf))
    }

    /// Reads a `u64` that must fit the platform's `usize`.
    pub(crate) fn read_usize(&mut self, what: &'static str) -> Result<usize, DecodeError> {
        let value = self.read_u64(what)?;
        usize::try_from(value).map_err(|_| DecodeError::InvalidConfig { field: what, value })
    }

    /// Reads a length-prefixed buffer that must be exactly `expected_len` bytes long.
    pub(crate) fn read_buffer(
        &mut self,
        what: &'static str,
        expected_len: usize,
    ) -> Result<&'a [u8], DecodeError> {
        let len = self.read_u64(what)?;
        expect_field(what, expected_len as u64, len)?;
        self.take(expected_len, what)
    }

    /// Reads a length-prefixed buffer of any length.
    #[cfg_attr(not(feature = "std"), allow(dead_code))]
    pub(crate) fn read_any_buffer(&mut self, what: &'static str) -> Result<&'a [u8], DecodeError> {
        let len = self.read_usize(what)?;
        self.take(len, what)
    }

    /// Fails if anything is left after the filter data.
    pub(crate) fn finish(self) -> Result<(), DecodeError> {
        match self.slice.len() {
            0 => Ok(()),
            n => Err(DecodeError::TrailingBytes(n)),
        }
    }
}

/// Compares a configuration scalar from encoded data against the target filter's.
pub(crate) fn expect_field(field: &'static str, expected: u64, actual: u64) -> Result<(), DecodeError> {
    if expected == actual {
        Ok(())
    } else {
        Err(DecodeError::ConfigMismatch {
            field,
            expected,
            actual,
        })
    }
}

/// The number of bytes [`Buckets`](crate::Buckets) needs for `len` cells of `bits` bits,
/// or `None` if that overflows.
pub(crate) fn packed_len(len: usize, bits: u8) -> Option<usize> {
    len.checked_mul(bits as usize)?.checked_add(7).map(|n| n / 8)
}

/// Logs a rejected decode before handing the error back.
pub(crate) fn log_rejected<T>(result: Result<T, DecodeError>) -> Result<T, DecodeError> {
    if let Err(err) = &result {
        log::debug!("rejected encoded filter: {err}");
    }
    result
}
