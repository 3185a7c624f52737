//! Decoding of command responses into sensor updates.
//!
//! Decoding never fails: a malformed frame is logged and yields an update
//! with the device identity and no measurements. The poll that fetched it
//! still succeeds.

use tracing::{trace, warn};

use vson_types::{DeviceIdentity, PollStrategy, SensorUpdate};

/// Decode a response frame for a device of `profile`.
///
/// Liveness-only profiles yield an empty update whatever the frame holds.
///
/// # Examples
///
/// ```
/// use vson_core::readings::decode_response;
/// use vson_types::{DeviceIdentity, Profile};
///
/// let identity = DeviceIdentity::for_profile(Profile::Vson, "AA:BB:CC:DD:EE:FF").unwrap();
/// let update = decode_response(&identity, &[0u8; 10]);
/// assert!(update.is_empty());
/// assert_eq!(update.identity().identifier(), "CCDDEEFF");
/// ```
pub fn decode_response(identity: &DeviceIdentity, frame: &[u8]) -> SensorUpdate {
    let layout = match identity.profile().descriptor().poll_strategy {
        PollStrategy::ReadFrame(layout) => layout,
        PollStrategy::Liveness => {
            trace!(identifier = identity.identifier(), "Liveness profile, nothing to decode");
            return SensorUpdate::new(identity.clone());
        }
    };

    match layout.decode(frame) {
        Ok(measurements) => SensorUpdate::from_measurements(identity.clone(), measurements),
        Err(e) => {
            warn!(
                identifier = identity.identifier(),
                len = frame.len(),
                "Ignoring malformed response frame: {}",
                e
            );
            SensorUpdate::new(identity.clone())
        }
    }
}

/// Update for a successful liveness check.
pub fn liveness_update(identity: &DeviceIdentity) -> SensorUpdate {
    SensorUpdate::new(identity.clone())
}
