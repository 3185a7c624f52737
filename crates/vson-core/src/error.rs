//! Error types for vson-core.
//!
//! Decoding problems never show up here: a malformed frame is absorbed by the
//! decoder and yields an empty [`vson_types::SensorUpdate`]. Everything below
//! is a session or transport failure that propagates to the scheduler.
//!
//! # Error Recovery Strategies
//!
//! | Error Type | Strategy | Rationale |
//! |------------|----------|-----------|
//! | [`Error::DeviceUnavailable`] | Retry later, quietly | Device out of range or not connectable right now |
//! | [`Error::ResponseTimeout`] | Retry on the next cycle | Device did not answer the command in time |
//! | [`Error::Timeout`] | Retry with backoff | A BLE stage (connect, discovery, write) hung |
//! | [`Error::ServiceNotFound`] | Retry once | GATT cache was cleared and the link dropped |
//! | [`Error::CharacteristicNotFound`] | Retry once | Same as above |
//! | [`Error::ConnectionFailed`] | Retry with backoff | Connection helper already retried |
//! | [`Error::PollInProgress`] | Do not retry | Another poll for the device is running |
//! | [`Error::IdentityUnknown`] | Wait for an advertisement | Device has not been seen yet |
//! | [`Error::PollFailed`] | Retry with backoff | Unexpected transport failure |
//! | [`Error::InvalidConfig`] | Do not retry | Fix configuration and restart |
//!
//! ## Error Classification
//!
//! [`Error::is_stale_gatt`] identifies the one failure class the command
//! session heals itself: the vendor GATT table is missing, so the
//! characteristic cache is cleared and the link dropped before the error is
//! returned. [`crate::retry`] decides which errors the connection helper may
//! retry.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur when talking to Vson devices.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Bluetooth Low Energy error.
    ///
    /// Raw transport errors never leave [`crate::DeviceSession::poll`]; they
    /// are converted to [`Error::PollFailed`] there.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// No connectable transport exists for the device right now.
    #[error("No connectable device for {address}")]
    DeviceUnavailable {
        /// Device address.
        address: String,
    },

    /// The vendor service is missing from the GATT table.
    #[error("Service not found: {uuid}")]
    ServiceNotFound {
        /// The service UUID that was not found.
        uuid: String,
    },

    /// Required BLE characteristic not found on device.
    #[error("Characteristic not found: {uuid} (searched in {service_count} services)")]
    CharacteristicNotFound {
        /// The UUID that was not found.
        uuid: String,
        /// Number of services that were searched.
        service_count: usize,
    },

    /// No response notification arrived within the response timeout.
    ///
    /// Only the command exchange produces this; it is kept apart from
    /// [`Error::Timeout`] so a scheduler can treat a slow device differently
    /// from a link that never came up.
    #[error("No response within {duration:?}")]
    ResponseTimeout {
        /// The response timeout.
        duration: Duration,
    },

    /// A BLE operation (connect, discovery, write, subscription) timed out.
    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The timeout duration.
        duration: Duration,
    },

    /// Operation attempted while not connected to device.
    #[error("Not connected to device")]
    NotConnected,

    /// Connection failed with specific reason.
    #[error("Connection failed: {reason}")]
    ConnectionFailed {
        /// The device identifier that failed to connect.
        device_id: Option<String>,
        /// The structured reason for the failure.
        reason: ConnectionFailureReason,
    },

    /// Write operation failed.
    #[error("Write failed to characteristic {uuid}: {reason}")]
    WriteFailed {
        /// The characteristic UUID.
        uuid: String,
        /// The reason for the failure.
        reason: String,
    },

    /// Poll requested before the device identity is known.
    #[error("Identity of {address} not known yet")]
    IdentityUnknown {
        /// Device address.
        address: String,
    },

    /// Another poll for the same device is still running.
    #[error("Poll already in progress for {address}")]
    PollInProgress {
        /// Device address.
        address: String,
    },

    /// The device is not registered with the coordinator.
    #[error("Unknown device {address}")]
    UnknownDevice {
        /// Device address.
        address: String,
    },

    /// Unexpected transport failure, caught at the poll boundary.
    #[error("Poll of {address} failed: {message}")]
    PollFailed {
        /// Device address.
        address: String,
        /// Description of the underlying failure.
        message: String,
    },

    /// Data received from the device was not usable.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Structured reasons for connection failures.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new reasons
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConnectionFailureReason {
    /// Bluetooth adapter not available or powered off.
    AdapterUnavailable,
    /// Device is out of range.
    OutOfRange,
    /// Device rejected the connection.
    Rejected,
    /// Connection attempt timed out.
    Timeout,
    /// Generic BLE error.
    BleError(String),
    /// Other/unknown error.
    Other(String),
}

impl std::fmt::Display for ConnectionFailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AdapterUnavailable => write!(f, "Bluetooth adapter unavailable"),
            Self::OutOfRange => write!(f, "device out of range"),
            Self::Rejected => write!(f, "connection rejected by device"),
            Self::Timeout => write!(f, "connection timed out"),
            Self::BleError(msg) => write!(f, "BLE error: {msg}"),
            Self::Other(msg) => write!(f, "{msg}"),
        }
    }
}

impl Error {
    /// Create a timeout error with operation context.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create a response timeout error.
    pub fn response_timeout(duration: Duration) -> Self {
        Self::ResponseTimeout { duration }
    }

    /// Create a service not found error.
    pub fn service_not_found(uuid: impl ToString) -> Self {
        Self::ServiceNotFound {
            uuid: uuid.to_string(),
        }
    }

    /// Create a characteristic not found error.
    pub fn characteristic_not_found(uuid: impl ToString, service_count: usize) -> Self {
        Self::CharacteristicNotFound {
            uuid: uuid.to_string(),
            service_count,
        }
    }

    /// Create a device unavailable error.
    pub fn device_unavailable(address: impl Into<String>) -> Self {
        Self::DeviceUnavailable {
            address: address.into(),
        }
    }

    /// Create a connection failure with structured reason.
    pub fn connection_failed(device_id: Option<String>, reason: ConnectionFailureReason) -> Self {
        Self::ConnectionFailed { device_id, reason }
    }

    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// True for a missing vendor service or characteristic.
    ///
    /// These come from a stale GATT cache (e.g. after a firmware update) and
    /// are handled by clearing the cache and dropping the connection.
    #[must_use]
    pub fn is_stale_gatt(&self) -> bool {
        matches!(
            self,
            Error::ServiceNotFound { .. } | Error::CharacteristicNotFound { .. }
        )
    }

    /// True for the response timeout of the command exchange.
    ///
    /// Stage timeouts ([`Error::Timeout`]) are transport failures and do not
    /// count.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::ResponseTimeout { .. })
    }

    /// True for raw transport failures that must not reach the scheduler.
    pub(crate) fn is_unexpected_transport(&self) -> bool {
        matches!(
            self,
            Error::Bluetooth(_) | Error::Io(_) | Error::NotConnected | Error::InvalidData(_)
        )
    }
}

impl From<vson_types::ParseError> for Error {
    fn from(err: vson_types::ParseError) -> Self {
        match err {
            vson_types::ParseError::InvalidAddress(address) => {
                Error::InvalidConfig(format!("invalid device address '{address}'"))
            }
            _ => Error::InvalidData(err.to_string()),
        }
    }
}

/// Result type alias using vson-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::device_unavailable("AA:BB:CC:DD:EE:FF");
        assert!(err.to_string().contains("AA:BB:CC:DD:EE:FF"));

        let err = Error::NotConnected;
        assert_eq!(err.to_string(), "Not connected to device");

        let err = Error::characteristic_not_found("0000fff4", 3);
        assert!(err.to_string().contains("0000fff4"));
        assert!(err.to_string().contains("3 services"));

        let err = Error::timeout("connect to device", Duration::from_secs(15));
        assert!(err.to_string().contains("connect to device"));
        assert!(err.to_string().contains("15s"));

        let err = Error::response_timeout(Duration::from_secs(5));
        assert_eq!(err.to_string(), "No response within 5s");
    }

    #[test]
    fn test_stale_gatt_classification() {
        assert!(Error::service_not_found("0000fff0").is_stale_gatt());
        assert!(Error::characteristic_not_found("0000fff1", 1).is_stale_gatt());
        assert!(!Error::timeout("x", Duration::from_secs(1)).is_stale_gatt());
        assert!(!Error::device_unavailable("x").is_stale_gatt());
    }

    #[test]
    fn test_timeout_is_distinct_from_transport() {
        let timeout = Error::response_timeout(Duration::from_secs(5));
        assert!(timeout.is_timeout());
        assert!(!timeout.is_unexpected_transport());
        assert!(!Error::timeout("connect to device", Duration::from_secs(15)).is_timeout());
        assert!(Error::NotConnected.is_unexpected_transport());
        assert!(!Error::device_unavailable("x").is_unexpected_transport());
    }

    #[test]
    fn test_connection_failure_reason_display() {
        let err = Error::connection_failed(
            Some("AA:BB".to_string()),
            ConnectionFailureReason::OutOfRange,
        );
        assert_eq!(err.to_string(), "Connection failed: device out of range");
        let err = Error::connection_failed(None, ConnectionFailureReason::BleError("le".into()));
        assert!(err.to_string().contains("BLE error: le"));
    }

    #[test]
    fn test_parse_error_conversion() {
        let err: Error = vson_types::ParseError::InvalidAddress("zz".to_string()).into();
        assert!(matches!(err, Error::InvalidConfig(_)));

        let err: Error = vson_types::ParseError::InsufficientBytes {
            expected: 18,
            actual: 2,
        }
        .into();
        assert!(matches!(err, Error::InvalidData(_)));
    }

    #[test]
    fn test_btleplug_error_conversion() {
        let err: Error = btleplug::Error::DeviceNotFound.into();
        assert!(matches!(err, Error::Bluetooth(_)));
        assert!(err.is_unexpected_transport());
    }
}
