//! Error types for data parsing in vson-types.

use thiserror::Error;

/// Errors that can occur when parsing Vson sensor data.
///
/// This error type is platform-agnostic and does not include
/// BLE-specific errors (those belong in vson-core).
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// The frame does not have the length its layout requires.
    #[error("Frame length mismatch: expected {expected} bytes, got {actual}")]
    InsufficientBytes {
        /// Exact length the layout requires.
        expected: usize,
        /// Length that was received.
        actual: usize,
    },

    /// A device address could not be turned into an identifier.
    #[error("Invalid device address '{0}'")]
    InvalidAddress(String),

    /// A field contained a value outside its valid range.
    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

/// Result type alias using vson-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_bytes_display() {
        let err = ParseError::InsufficientBytes {
            expected: 18,
            actual: 10,
        };
        assert_eq!(
            err.to_string(),
            "Frame length mismatch: expected 18 bytes, got 10"
        );
    }

    #[test]
    fn test_invalid_address_display() {
        let err = ParseError::InvalidAddress("zz".to_string());
        assert!(err.to_string().contains("'zz'"));
    }
}
