//! BLE advertisement decoding.
//!
//! An advertisement belongs to a supported device when it carries the vendor
//! service UUID ([`vson_types::uuids::VENDOR_SERVICE`]). The devices do not put
//! sensor values in their manufacturer data, so a match yields the device
//! identity and an empty passive update. Readings come from an active poll.
//!
//! A non-matching advertisement is not an error: [`parse_advertisement`]
//! returns `None`.

use std::collections::{BTreeMap, BTreeSet};

use uuid::Uuid;

use vson_types::{DeviceIdentity, ParseError, ParseResult, Profile, SensorUpdate, short_identifier};

use crate::util::normalize_address;

/// A validated advertisement record.
///
/// Built once at the transport boundary; the decoder only ever sees records
/// whose address yields a short identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    address: String,
    service_uuids: BTreeSet<Uuid>,
    manufacturer_data: BTreeMap<u16, Vec<u8>>,
    local_name: Option<String>,
    rssi: Option<i16>,
    connectable: bool,
}

impl Advertisement {
    /// Create a record from already-typed parts.
    ///
    /// Fails when the address cannot produce a short identifier.
    pub fn new(
        address: &str,
        service_uuids: impl IntoIterator<Item = Uuid>,
        manufacturer_data: impl IntoIterator<Item = (u16, Vec<u8>)>,
    ) -> ParseResult<Self> {
        short_identifier(address)?;
        Ok(Self {
            address: normalize_address(address),
            service_uuids: service_uuids.into_iter().collect(),
            manufacturer_data: manufacturer_data.into_iter().collect(),
            local_name: None,
            rssi: None,
            connectable: true,
        })
    }

    /// Create a record from service UUID strings, as delivered by most
    /// host stacks.
    ///
    /// # Examples
    ///
    /// ```
    /// use vson_core::Advertisement;
    ///
    /// let adv = Advertisement::parse(
    ///     "AA:BB:CC:DD:EE:FF",
    ///     ["0000fff0-0000-1000-8000-00805f9b34fb"],
    ///     [],
    /// ).unwrap();
    /// assert!(adv.has_vendor_service());
    /// ```
    pub fn parse<'a>(
        address: &str,
        service_uuids: impl IntoIterator<Item = &'a str>,
        manufacturer_data: impl IntoIterator<Item = (u16, Vec<u8>)>,
    ) -> ParseResult<Self> {
        let uuids = service_uuids
            .into_iter()
            .map(|s| {
                Uuid::parse_str(s.trim())
                    .map_err(|e| ParseError::InvalidValue(format!("service UUID '{s}': {e}")))
            })
            .collect::<ParseResult<Vec<_>>>()?;
        Self::new(address, uuids, manufacturer_data)
    }

    /// Set the advertised local name.
    #[must_use]
    pub fn with_local_name(mut self, name: impl Into<String>) -> Self {
        self.local_name = Some(name.into());
        self
    }

    /// Set the received signal strength.
    #[must_use]
    pub fn with_rssi(mut self, rssi: i16) -> Self {
        self.rssi = Some(rssi);
        self
    }

    /// Set whether the advertiser accepts connections.
    #[must_use]
    pub fn with_connectable(mut self, connectable: bool) -> Self {
        self.connectable = connectable;
        self
    }

    /// Normalized device address.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Advertised service UUIDs.
    pub fn service_uuids(&self) -> &BTreeSet<Uuid> {
        &self.service_uuids
    }

    /// Manufacturer data by company ID.
    pub fn manufacturer_data(&self) -> &BTreeMap<u16, Vec<u8>> {
        &self.manufacturer_data
    }

    /// Advertised local name.
    pub fn local_name(&self) -> Option<&str> {
        self.local_name.as_deref()
    }

    /// Received signal strength in dBm.
    pub fn rssi(&self) -> Option<i16> {
        self.rssi
    }

    /// Whether the advertiser accepts connections.
    pub fn is_connectable(&self) -> bool {
        self.connectable
    }

    /// Whether the vendor service UUID is advertised.
    pub fn has_vendor_service(&self) -> bool {
        self.service_uuids.contains(&vson_types::uuids::VENDOR_SERVICE)
    }

    /// Whether two records carry the same payload.
    ///
    /// Signal strength and connectability change between otherwise identical
    /// advertisements and are ignored.
    pub fn same_payload(&self, other: &Advertisement) -> bool {
        self.address == other.address
            && self.service_uuids == other.service_uuids
            && self.manufacturer_data == other.manufacturer_data
    }
}

/// Data decoded from a matching advertisement.
#[derive(Debug, Clone, PartialEq)]
pub struct AdvertisementData {
    /// Device identity under the requested profile.
    pub identity: DeviceIdentity,
    /// Passive readings; always empty for the supported firmware.
    pub update: SensorUpdate,
    /// Signal strength of the advertisement.
    pub rssi: Option<i16>,
}

/// Decode an advertisement under `profile`.
///
/// Returns `None` when the advertisement does not carry the profile's
/// service UUID.
///
/// # Examples
///
/// ```
/// use vson_core::{Advertisement, parse_advertisement};
/// use vson_types::{Profile, uuids};
///
/// let adv = Advertisement::new("AA:BB:CC:DD:EE:FF", [uuids::VENDOR_SERVICE], []).unwrap();
/// let data = parse_advertisement(Profile::Vson, &adv).unwrap();
/// assert_eq!(data.identity.identifier(), "CCDDEEFF");
///
/// let other = Advertisement::new("AA:BB:CC:DD:EE:FF", [], []).unwrap();
/// assert!(parse_advertisement(Profile::Vson, &other).is_none());
/// ```
pub fn parse_advertisement(profile: Profile, adv: &Advertisement) -> Option<AdvertisementData> {
    let descriptor = profile.descriptor();
    if !adv.service_uuids.contains(&descriptor.service_uuid) {
        return None;
    }
    // Address was validated on construction.
    let identity = DeviceIdentity::for_profile(profile, &adv.address).ok()?;
    Some(AdvertisementData {
        update: SensorUpdate::new(identity.clone()),
        identity,
        rssi: adv.rssi,
    })
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Decoding any well-formed record never panics, and a match always
        /// carries the identifier derived from the address.
        #[test]
        fn parse_advertisement_never_panics(
            addr in prop::array::uniform6(any::<u8>()),
            with_vendor: bool,
            manufacturer in prop::collection::btree_map(any::<u16>(), prop::collection::vec(any::<u8>(), 0..32), 0..3),
        ) {
            let address = addr.iter().map(|b| format!("{b:02X}")).collect::<Vec<_>>().join(":");
            let uuids = if with_vendor { vec![vson_types::uuids::VENDOR_SERVICE] } else { vec![] };
            let adv = Advertisement::new(&address, uuids, manufacturer).unwrap();

            for profile in Profile::ALL {
                match parse_advertisement(profile, &adv) {
                    Some(data) => {
                        prop_assert!(with_vendor);
                        prop_assert_eq!(data.identity.identifier(), &address.replace(':', "")[4..]);
                    }
                    None => prop_assert!(!with_vendor),
                }
            }
        }
    }
}
