//! Platform-agnostic types for Vson / WP6003 air quality sensors.
//!
//! This crate holds everything that can be decided without a Bluetooth stack:
//! device profiles, device identity, typed measurements, the merged
//! [`SensorUpdate`], GATT UUID constants and the response frame decoder.
//!
//! # Example
//!
//! ```
//! use vson_types::{DeviceIdentity, Profile, SensorUpdate, frame};
//!
//! let identity = DeviceIdentity::for_profile(Profile::Vson, "AA:BB:CC:DD:EE:FF").unwrap();
//! let frame = [
//!     0x0a, 0x00, 0x01, 0x01, 0x0e, 0x02, 0x01, 0x09, 0x08,
//!     0x00, 0x00, 0x65, 0x00, 0x0f, 0x01, 0x00, 0x02, 0x51,
//! ];
//! let update = SensorUpdate::from_measurements(identity, frame::decode_frame(&frame).unwrap());
//! assert_eq!(update.len(), 4);
//! ```

pub mod error;
pub mod frame;
pub mod types;
pub mod uuid;

pub use error::{ParseError, ParseResult};
pub use frame::{FRAME_LEN, FieldSpec, FrameLayout, decode_frame};
pub use types::{
    DeviceIdentity, IDENTIFIER_LEN, Measurement, MeasurementKey, MeasurementKind,
    MeasurementValue, PollSchedule, PollStrategy, Profile, ProfileDescriptor, SensorUpdate, Unit,
    VSON_POLL_INTERVAL, short_identifier,
};
pub use uuid as uuids;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vson_profile_reads_vson_frame() {
        let layout = Profile::Vson.descriptor().frame_layout().unwrap();
        assert_eq!(layout, &frame::VSON_FRAME);
        assert_eq!(layout.length, FRAME_LEN);
    }

    #[test]
    fn test_profiles_share_vendor_service() {
        for profile in Profile::ALL {
            assert_eq!(profile.descriptor().service_uuid, uuids::VENDOR_SERVICE);
        }
    }

    #[test]
    fn test_update_from_decoded_frame() {
        let identity = DeviceIdentity::for_profile(Profile::Vson, "AA:BB:CC:DD:EE:FF").unwrap();
        let frame = [0u8; FRAME_LEN];
        let update = SensorUpdate::from_measurements(identity, decode_frame(&frame).unwrap());
        assert_eq!(update.identity().identifier(), "CCDDEEFF");
        assert_eq!(
            update.get(MeasurementKind::Co2).unwrap().value(),
            MeasurementValue::Integer(0)
        );
    }
}
