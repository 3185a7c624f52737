//! Device discovery and scanning.
//!
//! Scans turn btleplug peripheral properties into [`Advertisement`] records.
//! [`BleLocator`] answers the coordinator's "connectable handle for X"
//! question from the adapter's peripheral list.

use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{Central, Manager as _, Peripheral as _, PeripheralProperties, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use vson_types::uuids::VENDOR_SERVICE;

use crate::advertisement::Advertisement;
use crate::device::{BleConnection, ConnectionConfig};
use crate::error::{ConnectionFailureReason, Error, Result};
use crate::traits::DeviceLocator;
use crate::util::{create_identifier, same_address};

/// Options for scanning.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// How long to scan for devices.
    pub duration: Duration,
    /// Only return advertisements carrying the vendor service.
    pub vendor_only: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(5),
            vendor_only: true,
        }
    }
}

impl ScanOptions {
    /// Set the scan duration.
    #[must_use]
    pub fn duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Return every advertiser, not just supported sensors.
    #[must_use]
    pub fn all_devices(mut self) -> Self {
        self.vendor_only = false;
        self
    }
}

/// Get the first available Bluetooth adapter.
pub async fn get_adapter() -> Result<Adapter> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;

    adapters
        .into_iter()
        .next()
        .ok_or(Error::connection_failed(None, ConnectionFailureReason::AdapterUnavailable))
}

/// Build an advertisement record from peripheral properties.
///
/// `address` is the identifier the peripheral is known by (see
/// [`create_identifier`]). Returns `None` when it yields no short identifier.
pub fn advertisement_from_properties(
    properties: &PeripheralProperties,
    address: &str,
) -> Option<Advertisement> {
    let manufacturer_data = properties
        .manufacturer_data
        .iter()
        .map(|(company, data)| (*company, data.clone()));

    let adv = match Advertisement::new(address, properties.services.iter().copied(), manufacturer_data) {
        Ok(adv) => adv,
        Err(e) => {
            debug!(address = %address, "Skipping advertiser: {}", e);
            return None;
        }
    };
    let adv = match &properties.local_name {
        Some(name) => adv.with_local_name(name.clone()),
        None => adv,
    };
    Some(match properties.rssi {
        Some(rssi) => adv.with_rssi(rssi),
        None => adv,
    })
}

/// Scan with the first adapter.
pub async fn scan_for_devices(options: ScanOptions) -> Result<Vec<Advertisement>> {
    let adapter = get_adapter().await?;
    scan_with_adapter(&adapter, &options).await
}

/// Scan using a specific adapter.
pub async fn scan_with_adapter(adapter: &Adapter, options: &ScanOptions) -> Result<Vec<Advertisement>> {
    info!("Starting BLE scan for {} seconds...", options.duration.as_secs());

    let filter = if options.vendor_only {
        ScanFilter {
            services: vec![VENDOR_SERVICE],
        }
    } else {
        ScanFilter::default()
    };
    adapter.start_scan(filter).await?;
    sleep(options.duration).await;
    adapter.stop_scan().await?;

    let mut found = Vec::new();
    for peripheral in adapter.peripherals().await? {
        let properties = match peripheral.properties().await {
            Ok(Some(p)) => p,
            Ok(None) => continue,
            Err(e) => {
                debug!("Error reading peripheral properties: {}", e);
                continue;
            }
        };
        let address = create_identifier(&properties.address.to_string(), &peripheral.id());
        let Some(adv) = advertisement_from_properties(&properties, &address) else {
            continue;
        };
        if options.vendor_only && !adv.has_vendor_service() {
            continue;
        }
        debug!(address = %adv.address(), name = ?adv.local_name(), "Found advertiser");
        found.push(adv);
    }

    info!("Scan complete. Found {} device(s)", found.len());
    Ok(found)
}

/// Locates connectable peripherals among those the adapter has seen.
#[derive(Debug, Clone)]
pub struct BleLocator {
    adapter: Adapter,
    config: ConnectionConfig,
}

impl BleLocator {
    /// Create a locator over `adapter`.
    pub fn new(adapter: Adapter, config: ConnectionConfig) -> Self {
        Self { adapter, config }
    }

    /// Create a locator over the first adapter.
    pub async fn with_default_adapter(config: ConnectionConfig) -> Result<Self> {
        Ok(Self::new(get_adapter().await?, config))
    }

    /// The adapter this locator searches.
    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    async fn find_peripheral(&self, address: &str) -> Result<Option<(Peripheral, String)>> {
        for peripheral in self.adapter.peripherals().await? {
            let Some(properties) = peripheral.properties().await? else {
                continue;
            };
            let identifier = create_identifier(&properties.address.to_string(), &peripheral.id());
            if same_address(&identifier, address) {
                return Ok(Some((peripheral, identifier)));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl DeviceLocator for BleLocator {
    type Connection = BleConnection;

    async fn find_connectable(&self, address: &str) -> Option<BleConnection> {
        match self.find_peripheral(address).await {
            Ok(Some((peripheral, identifier))) => {
                Some(BleConnection::new(peripheral, identifier, self.config.clone()))
            }
            Ok(None) => {
                debug!(address, "Device not seen by adapter");
                None
            }
            Err(e) => {
                warn!(address, "Adapter lookup failed: {}", e);
                None
            }
        }
    }
}
