//! Bluetooth UUIDs for Vson / WP6003 devices.
//!
//! Both the Vson and the WP6003 firmware expose the same vendor service.
//! The command characteristic accepts single-byte opcodes and the
//! notification characteristic answers with one 18-byte frame per command.

use uuid::{Uuid, uuid};

// --- Vendor Service UUIDs ---

/// Vendor service advertised by every supported device.
pub const VENDOR_SERVICE: Uuid = uuid!("0000fff0-0000-1000-8000-00805f9b34fb");

// --- Vendor Characteristic UUIDs ---

/// Command characteristic (write).
pub const COMMAND: Uuid = uuid!("0000fff1-0000-1000-8000-00805f9b34fb");

/// Notification characteristic carrying command responses.
pub const NOTIFY: Uuid = uuid!("0000fff4-0000-1000-8000-00805f9b34fb");

// --- Standard BLE Service UUIDs ---

/// Generic Access Profile (GAP) service.
pub const GAP_SERVICE: Uuid = uuid!("00001800-0000-1000-8000-00805f9b34fb");

/// Device Information service.
pub const DEVICE_INFO_SERVICE: Uuid = uuid!("0000180a-0000-1000-8000-00805f9b34fb");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vendor_service_uuid() {
        assert_eq!(
            VENDOR_SERVICE.to_string(),
            "0000fff0-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_characteristic_uuids() {
        assert_eq!(COMMAND.to_string(), "0000fff1-0000-1000-8000-00805f9b34fb");
        assert_eq!(NOTIFY.to_string(), "0000fff4-0000-1000-8000-00805f9b34fb");
    }

    #[test]
    fn test_characteristics_share_base_uuid() {
        // Characteristics are 16-bit UUIDs on the Bluetooth base UUID.
        let base = VENDOR_SERVICE.as_u128() & !(0xFFFF_u128 << 96);
        assert_eq!(COMMAND.as_u128() & !(0xFFFF_u128 << 96), base);
        assert_eq!(NOTIFY.as_u128() & !(0xFFFF_u128 << 96), base);
    }

    #[test]
    fn test_uuids_are_distinct() {
        let all = [VENDOR_SERVICE, COMMAND, NOTIFY, GAP_SERVICE, DEVICE_INFO_SERVICE];
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}
