/// The largest slot count an [`InverseBloomFilter`](crate::InverseBloomFilter) may round up to.
pub const MAX_SIZE: usize = 1 << 30;

/// Returned when an inverse filter is requested with an unusable size.
#[derive(Debug, Clone, Copy, Eq, PartialEq, thiserror::Error)]
pub enum SizeError {
    #[error("size must be greater than 0")]
    TooSmall,
    #[error("size {0} is too large to round to a power of two (maximum is {max})", max = MAX_SIZE)]
    TooLarge(usize),
}

/// Returned when filter bytes cannot be decoded.
///
/// Decoding validates the whole input before touching the target filter, so a
/// failed decode leaves the filter unchanged.
#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum DecodeError {
    #[error("insufficient data while reading {0}")]
    InsufficientData(&'static str),
    #[error("invalid family: expected {expected}, got {actual}")]
    InvalidFamily { expected: u8, actual: u8 },
    #[error("unsupported serial version: expected {expected}, got {actual}")]
    UnsupportedVersion { expected: u8, actual: u8 },
    #[error("configuration mismatch on `{field}`: filter has {expected}, data has {actual}")]
    ConfigMismatch {
        field: &'static str,
        expected: u64,
        actual: u64,
    },
    #[error("invalid `{field}` in encoded filter: {value}")]
    InvalidConfig { field: &'static str, value: u64 },
    #[error("{0} unexpected trailing bytes after filter data")]
    TrailingBytes(usize),
}
