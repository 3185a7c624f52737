//! Address helpers shared by the coordinator and the btleplug transport.

use btleplug::platform::PeripheralId;

/// Canonical form of a device address used as map key.
///
/// Addresses are compared case-insensitively and surrounding whitespace is
/// ignored, so `aa:bb:cc:dd:ee:ff` and `AA:BB:CC:DD:EE:FF` name the same device.
pub fn normalize_address(address: &str) -> String {
    address.trim().to_ascii_uppercase()
}

/// Whether two addresses name the same device.
pub fn same_address(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

/// Format a peripheral ID as a string.
///
/// On macOS, peripheral IDs are UUIDs. On other platforms they wrap the
/// Bluetooth address.
pub fn format_peripheral_id(id: &PeripheralId) -> String {
    format!("{id:?}")
        .trim_start_matches("PeripheralId(")
        .trim_end_matches(')')
        .to_string()
}

/// Pick the address a peripheral is known by.
///
/// On macOS the reported address is all zeros and the peripheral ID is used
/// instead.
pub fn create_identifier(address: &str, peripheral_id: &PeripheralId) -> String {
    if address == "00:00:00:00:00:00" {
        normalize_address(&format_peripheral_id(peripheral_id))
    } else {
        normalize_address(address)
    }
}
