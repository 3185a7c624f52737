//! Core types for Vson sensor data.

use core::fmt;
use std::collections::BTreeMap;
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{ParseError, ParseResult};
use crate::frame::{FrameLayout, VSON_FRAME};
use crate::uuid::VENDOR_SERVICE;

/// Number of hex characters kept from the hardware address.
pub const IDENTIFIER_LEN: usize = 8;

/// Fixed active-poll interval used by the Vson profile.
pub const VSON_POLL_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Supported device profile.
///
/// Both profiles advertise the same vendor service and cannot be told apart
/// from an advertisement, so the host picks the profile per registered device.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new profiles
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
#[non_exhaustive]
pub enum Profile {
    /// Vson air quality monitor, actively read every few minutes.
    Vson,
    /// WP6003 air quality sensor, connectivity-checked at most once a day.
    Wp6003,
}

impl Profile {
    /// All known profiles.
    pub const ALL: [Profile; 2] = [Profile::Vson, Profile::Wp6003];

    /// Returns the static descriptor for this profile.
    ///
    /// # Examples
    ///
    /// ```
    /// use vson_types::Profile;
    ///
    /// assert_eq!(Profile::Vson.descriptor().manufacturer, "Vson Technology CO., LTD");
    /// assert_eq!(Profile::Wp6003.descriptor().manufacturer, "Vson");
    /// ```
    #[must_use]
    pub fn descriptor(self) -> &'static ProfileDescriptor {
        match self {
            Profile::Vson => &VSON_PROFILE,
            Profile::Wp6003 => &WP6003_PROFILE,
        }
    }

    /// Parse a profile name (case-insensitive).
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "vson" => Some(Profile::Vson),
            "wp6003" => Some(Profile::Wp6003),
            _ => None,
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Profile::Vson => write!(f, "vson"),
            Profile::Wp6003 => write!(f, "wp6003"),
        }
    }
}

impl std::str::FromStr for Profile {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Profile::from_name(s).ok_or_else(|| ParseError::InvalidValue(format!("unknown profile '{s}'")))
    }
}

/// What an active read against the device does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStrategy {
    /// Send the read command and decode the response with this layout.
    ReadFrame(&'static FrameLayout),
    /// Connect, enumerate the GATT table and disconnect. Yields no measurements.
    Liveness,
}

/// Default scheduling of active reads for a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollSchedule {
    /// Poll when an advertisement arrives and the poll age gate has elapsed.
    OnAdvertisement,
    /// Poll on a fixed interval.
    Interval(Duration),
}

/// Static description of a device profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfileDescriptor {
    /// Profile this descriptor belongs to.
    pub profile: Profile,
    /// Service UUID that marks an advertisement as belonging to this profile.
    pub service_uuid: Uuid,
    /// Model name.
    pub model: &'static str,
    /// Manufacturer name.
    pub manufacturer: &'static str,
    /// Device category label.
    pub device_type: &'static str,
    /// What an active read does.
    pub poll_strategy: PollStrategy,
    /// Default scheduling of active reads.
    pub schedule: PollSchedule,
    name_prefix: Option<&'static str>,
}

impl ProfileDescriptor {
    /// Display name for a device with the given short identifier.
    #[must_use]
    pub fn device_name(&self, identifier: &str) -> String {
        match self.name_prefix {
            Some(prefix) => format!("{prefix} {identifier}"),
            None => identifier.to_string(),
        }
    }

    /// Frame layout decoded by an active read, if any.
    #[must_use]
    pub fn frame_layout(&self) -> Option<&'static FrameLayout> {
        match self.poll_strategy {
            PollStrategy::ReadFrame(layout) => Some(layout),
            PollStrategy::Liveness => None,
        }
    }
}

static VSON_PROFILE: ProfileDescriptor = ProfileDescriptor {
    profile: Profile::Vson,
    service_uuid: VENDOR_SERVICE,
    model: "WP6003",
    manufacturer: "Vson Technology CO., LTD",
    device_type: "Air Quality Monitor",
    poll_strategy: PollStrategy::ReadFrame(&VSON_FRAME),
    schedule: PollSchedule::Interval(VSON_POLL_INTERVAL),
    name_prefix: Some("WP6003"),
};

static WP6003_PROFILE: ProfileDescriptor = ProfileDescriptor {
    profile: Profile::Wp6003,
    service_uuid: VENDOR_SERVICE,
    model: "WP6003",
    manufacturer: "Vson",
    device_type: "Air Quality Sensor",
    poll_strategy: PollStrategy::Liveness,
    schedule: PollSchedule::OnAdvertisement,
    name_prefix: None,
};

/// Derive the short identifier from a hardware address.
///
/// Separators (`:` and `-`) are stripped and the last 8 hex characters are
/// kept, uppercased.
///
/// # Examples
///
/// ```
/// use vson_types::short_identifier;
///
/// assert_eq!(short_identifier("AA:BB:CC:DD:EE:FF").unwrap(), "CCDDEEFF");
/// assert_eq!(short_identifier("aa-bb-cc-dd-ee-ff").unwrap(), "CCDDEEFF");
/// assert!(short_identifier("AA:BB").is_err());
/// ```
pub fn short_identifier(address: &str) -> ParseResult<String> {
    let hex: String = address.chars().filter(|c| *c != ':' && *c != '-').collect();
    if hex.len() < IDENTIFIER_LEN || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ParseError::InvalidAddress(address.to_string()));
    }
    Ok(hex[hex.len() - IDENTIFIER_LEN..].to_ascii_uppercase())
}

/// Identity of a physical device, established once from its first matching
/// advertisement.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DeviceIdentity {
    profile: Profile,
    model: String,
    manufacturer: String,
    identifier: String,
    device_type: String,
    name: String,
}

impl DeviceIdentity {
    /// Build the identity of the device at `address` under `profile`.
    pub fn for_profile(profile: Profile, address: &str) -> ParseResult<Self> {
        let descriptor = profile.descriptor();
        let identifier = short_identifier(address)?;
        Ok(Self {
            profile,
            model: descriptor.model.to_string(),
            manufacturer: descriptor.manufacturer.to_string(),
            name: descriptor.device_name(&identifier),
            identifier,
            device_type: descriptor.device_type.to_string(),
        })
    }

    /// Profile the identity was created under.
    #[must_use]
    pub fn profile(&self) -> Profile {
        self.profile
    }

    /// Model name.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Manufacturer name.
    #[must_use]
    pub fn manufacturer(&self) -> &str {
        &self.manufacturer
    }

    /// Short identifier (last 8 hex characters of the address).
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Device category label.
    #[must_use]
    pub fn device_type(&self) -> &str {
        &self.device_type
    }

    /// Display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} {})", self.name, self.manufacturer, self.model)
    }
}

/// Semantic kind of a measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[non_exhaustive]
pub enum MeasurementKind {
    /// Air temperature.
    Temperature,
    /// Total volatile organic compounds.
    Tvoc,
    /// Formaldehyde (HCHO).
    Formaldehyde,
    /// Carbon dioxide.
    Co2,
}

impl fmt::Display for MeasurementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            MeasurementKind::Temperature => "Temperature",
            MeasurementKind::Tvoc => "TVOC",
            MeasurementKind::Formaldehyde => "HCHO",
            MeasurementKind::Co2 => "CO2",
        };
        f.write_str(label)
    }
}

/// Unit of a measurement value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[non_exhaustive]
pub enum Unit {
    /// Degrees Celsius.
    Celsius,
    /// Milligrams per cubic meter.
    MilligramsPerCubicMeter,
    /// Parts per million.
    PartsPerMillion,
}

impl Unit {
    /// Unit symbol.
    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            Unit::Celsius => "°C",
            Unit::MilligramsPerCubicMeter => "mg/m³",
            Unit::PartsPerMillion => "ppm",
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Numeric value of a measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
pub enum MeasurementValue {
    /// Integer value (unscaled fields).
    Integer(i64),
    /// Scaled, rounded value.
    Float(f64),
}

impl MeasurementValue {
    /// Value as a float.
    #[must_use]
    pub fn as_f64(self) -> f64 {
        match self {
            MeasurementValue::Integer(v) => v as f64,
            MeasurementValue::Float(v) => v,
        }
    }
}

impl fmt::Display for MeasurementValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeasurementValue::Integer(v) => write!(f, "{v}"),
            MeasurementValue::Float(v) => write!(f, "{v:.2}"),
        }
    }
}

/// Key under which a measurement is stored in a [`SensorUpdate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeasurementKey {
    /// Semantic kind.
    pub kind: MeasurementKind,
    /// Unit.
    pub unit: Unit,
}

/// A single decoded measurement.
///
/// Measurements are only produced by the frame decoder.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Measurement {
    kind: MeasurementKind,
    value: MeasurementValue,
    unit: Unit,
}

impl Measurement {
    pub(crate) fn new(kind: MeasurementKind, value: MeasurementValue, unit: Unit) -> Self {
        Self { kind, value, unit }
    }

    /// Semantic kind.
    #[must_use]
    pub fn kind(&self) -> MeasurementKind {
        self.kind
    }

    /// Numeric value.
    #[must_use]
    pub fn value(&self) -> MeasurementValue {
        self.value
    }

    /// Unit.
    #[must_use]
    pub fn unit(&self) -> Unit {
        self.unit
    }

    /// Map key of this measurement.
    #[must_use]
    pub fn key(&self) -> MeasurementKey {
        MeasurementKey {
            kind: self.kind,
            unit: self.unit,
        }
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} {}", self.kind, self.value, self.unit)
    }
}

/// Decoded output for one device: its identity plus measurements keyed by
/// `(kind, unit)`.
///
/// Two measurements with the same key never coexist. Inserting or merging a
/// measurement under an existing key replaces it (last write wins) and reports
/// the replaced value so the overwrite is observable.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SensorUpdate {
    identity: DeviceIdentity,
    #[cfg_attr(feature = "serde", serde(with = "measurement_list"))]
    measurements: BTreeMap<MeasurementKey, Measurement>,
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    captured_at: OffsetDateTime,
}

impl SensorUpdate {
    /// Empty update for `identity`, captured now.
    #[must_use]
    pub fn new(identity: DeviceIdentity) -> Self {
        Self {
            identity,
            measurements: BTreeMap::new(),
            captured_at: OffsetDateTime::now_utc(),
        }
    }

    /// Update built from decoded measurements, in order.
    #[must_use]
    pub fn from_measurements(
        identity: DeviceIdentity,
        measurements: impl IntoIterator<Item = Measurement>,
    ) -> Self {
        let mut update = Self::new(identity);
        for m in measurements {
            update.insert(m);
        }
        update
    }

    /// Set the capture timestamp.
    #[must_use]
    pub fn with_captured_at(mut self, captured_at: OffsetDateTime) -> Self {
        self.captured_at = captured_at;
        self
    }

    /// Insert a measurement, returning the one it replaced.
    pub fn insert(&mut self, measurement: Measurement) -> Option<Measurement> {
        self.measurements.insert(measurement.key(), measurement)
    }

    /// Fold `other` into this update.
    ///
    /// Every measurement of `other` wins over the one stored under the same
    /// key. The capture time becomes the later of the two. Returns the keys
    /// whose value was replaced.
    pub fn merge(&mut self, other: SensorUpdate) -> Vec<MeasurementKey> {
        let mut replaced = Vec::new();
        for (key, m) in other.measurements {
            if self.measurements.insert(key, m).is_some() {
                replaced.push(key);
            }
        }
        if other.captured_at > self.captured_at {
            self.captured_at = other.captured_at;
        }
        replaced
    }

    /// Device identity.
    #[must_use]
    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// When the update was captured.
    #[must_use]
    pub fn captured_at(&self) -> OffsetDateTime {
        self.captured_at
    }

    /// First measurement of the given kind, in any unit.
    #[must_use]
    pub fn get(&self, kind: MeasurementKind) -> Option<&Measurement> {
        self.measurements.values().find(|m| m.kind == kind)
    }

    /// Measurement stored under an exact key.
    #[must_use]
    pub fn get_key(&self, key: MeasurementKey) -> Option<&Measurement> {
        self.measurements.get(&key)
    }

    /// Iterate over measurements in key order.
    pub fn measurements(&self) -> impl Iterator<Item = &Measurement> {
        self.measurements.values()
    }

    /// Number of measurements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.measurements.len()
    }

    /// True when the update carries no measurements (liveness-only outcome).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.measurements.is_empty()
    }
}

impl fmt::Display for SensorUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.identity)?;
        for m in self.measurements.values() {
            write!(f, "\n  {m}")?;
        }
        Ok(())
    }
}

/// Serializes the measurement map as a flat list; JSON maps need string keys.
#[cfg(feature = "serde")]
mod measurement_list {
    use std::collections::BTreeMap;

    use serde::{Deserialize, Deserializer, Serializer};

    use super::{Measurement, MeasurementKey};

    pub fn serialize<S>(
        map: &BTreeMap<MeasurementKey, Measurement>,
        serializer: S,
    ) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_seq(map.values())
    }

    pub fn deserialize<'de, D>(
        deserializer: D,
    ) -> Result<BTreeMap<MeasurementKey, Measurement>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let list = Vec::<Measurement>::deserialize(deserializer)?;
        Ok(list.into_iter().map(|m| (m.key(), m)).collect())
    }
}
