//! Transport abstractions consumed by the command session.
//!
//! [`GattConnection`] is the connectable handle for one peripheral and
//! [`DeviceLocator`] is the host capability that hands one out. The
//! `btleplug` implementations live in [`crate::device`] and [`crate::scan`],
//! the test doubles in [`crate::mock`].

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;

/// Callback invoked with the payload of every notification on a
/// subscribed characteristic.
pub type NotificationHandler = Box<dyn Fn(&[u8]) + Send + Sync + 'static>;

/// Snapshot of a peripheral's GATT table: services and their characteristics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GattTable {
    services: BTreeMap<Uuid, BTreeSet<Uuid>>,
}

impl GattTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a service with its characteristics.
    #[must_use]
    pub fn with_service(mut self, service: Uuid, characteristics: impl IntoIterator<Item = Uuid>) -> Self {
        self.add_characteristics(service, characteristics);
        self
    }

    /// Add characteristics under a service, creating the service if needed.
    pub fn add_characteristics(
        &mut self,
        service: Uuid,
        characteristics: impl IntoIterator<Item = Uuid>,
    ) {
        self.services
            .entry(service)
            .or_default()
            .extend(characteristics);
    }

    /// True when the service is present.
    pub fn has_service(&self, service: Uuid) -> bool {
        self.services.contains_key(&service)
    }

    /// True when the characteristic is present under the service.
    pub fn has_characteristic(&self, service: Uuid, characteristic: Uuid) -> bool {
        self.services
            .get(&service)
            .is_some_and(|chars| chars.contains(&characteristic))
    }

    /// Number of services.
    pub fn service_count(&self) -> usize {
        self.services.len()
    }

    /// Iterate over service UUIDs.
    pub fn services(&self) -> impl Iterator<Item = &Uuid> {
        self.services.keys()
    }
}

/// A connectable handle to one BLE peripheral.
///
/// The command session owns the handle exclusively for its lifetime; no other
/// component writes to it or reads its notifications concurrently.
#[async_trait]
pub trait GattConnection: Send + Sync {
    // --- Identity ---

    /// Device address (MAC on Linux/Windows, CoreBluetooth UUID on macOS).
    fn address(&self) -> &str;

    // --- Connection Management ---

    /// Establish the link. Implementations bound this with their own timeout.
    async fn connect(&self) -> Result<()>;

    /// Check if the link is up.
    async fn is_connected(&self) -> bool;

    /// Drop the link.
    async fn disconnect(&self) -> Result<()>;

    // --- GATT ---

    /// Discover services and characteristics.
    async fn discover(&self) -> Result<GattTable>;

    /// Forget cached services and characteristics.
    async fn clear_cache(&self) -> Result<()>;

    /// Route notifications of `characteristic` to `handler`.
    async fn subscribe(&self, characteristic: Uuid, handler: NotificationHandler) -> Result<()>;

    /// Stop notifications of `characteristic`.
    async fn unsubscribe(&self, characteristic: Uuid) -> Result<()>;

    /// Write `data` to `characteristic`.
    async fn write(&self, characteristic: Uuid, data: &[u8]) -> Result<()>;
}

/// Host capability: "give me a connectable transport handle for address X".
#[async_trait]
pub trait DeviceLocator: Send + Sync {
    /// Handle type produced by this locator.
    type Connection: GattConnection + 'static;

    /// Connectable handle for `address`, or `None` when the device cannot be
    /// reached right now.
    async fn find_connectable(&self, address: &str) -> Option<Self::Connection>;

    /// Whether a connectable path to `address` currently exists.
    async fn is_connectable(&self, address: &str) -> bool {
        self.find_connectable(address).await.is_some()
    }
}
