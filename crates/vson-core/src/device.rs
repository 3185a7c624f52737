//! btleplug transport.
//!
//! [`BleConnection`] adapts one btleplug [`Peripheral`] to [`GattConnection`]
//! so a [`CommandSession`](crate::session::CommandSession) can drive real
//! hardware. Every BLE call is bounded by a timeout from [`ConnectionConfig`].

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{Characteristic, Peripheral as _, WriteType};
use btleplug::platform::Peripheral;
use futures::StreamExt;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::traits::{GattConnection, GattTable, NotificationHandler};

/// Default timeout for BLE connection operations.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Default timeout for service discovery.
const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for characteristic writes and (un)subscribe calls.
const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for BLE connection timeouts and behavior.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use vson_core::device::ConnectionConfig;
///
/// let config = ConnectionConfig::default()
///     .connection_timeout(Duration::from_secs(20))
///     .write_without_response(true);
/// assert_eq!(config.connection_timeout, Duration::from_secs(20));
/// ```
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Timeout for establishing a BLE connection.
    pub connection_timeout: Duration,
    /// Timeout for service discovery after connection.
    pub discovery_timeout: Duration,
    /// Timeout for writes and notification (un)subscription.
    pub write_timeout: Duration,
    /// Write commands without waiting for the ATT response.
    pub write_without_response: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connection_timeout: DEFAULT_CONNECT_TIMEOUT,
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            write_without_response: false,
        }
    }
}

impl ConnectionConfig {
    /// Set the connection timeout.
    #[must_use]
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set the service discovery timeout.
    #[must_use]
    pub fn discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    /// Set the write timeout.
    #[must_use]
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Write without response.
    #[must_use]
    pub fn write_without_response(mut self, enabled: bool) -> Self {
        self.write_without_response = enabled;
        self
    }

    fn write_type(&self) -> WriteType {
        if self.write_without_response {
            WriteType::WithoutResponse
        } else {
            WriteType::WithResponse
        }
    }
}

/// A btleplug peripheral behind the [`GattConnection`] seam.
///
/// Does not implement `Clone`: a session owns its handle exclusively. Call
/// [`GattConnection::disconnect`] before dropping to abort notification
/// tasks; the command session always does.
pub struct BleConnection {
    peripheral: Peripheral,
    address: String,
    config: ConnectionConfig,
    /// Characteristics by UUID, filled by `discover`.
    characteristics: RwLock<HashMap<Uuid, Characteristic>>,
    /// Notification forwarding tasks by characteristic.
    notification_handles: Mutex<HashMap<Uuid, JoinHandle<()>>>,
}

impl std::fmt::Debug for BleConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BleConnection")
            .field("address", &self.address)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl BleConnection {
    /// Wrap a discovered peripheral known under `address`.
    pub fn new(peripheral: Peripheral, address: impl Into<String>, config: ConnectionConfig) -> Self {
        Self {
            peripheral,
            address: address.into(),
            config,
            characteristics: RwLock::new(HashMap::new()),
            notification_handles: Mutex::new(HashMap::new()),
        }
    }

    /// Connection configuration.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    async fn find_characteristic(&self, uuid: Uuid) -> Result<Characteristic> {
        let cache = self.characteristics.read().await;
        cache
            .get(&uuid)
            .cloned()
            .ok_or_else(|| Error::characteristic_not_found(uuid, self.peripheral.services().len()))
    }

    async fn abort_notifications(&self) {
        let mut handles = self.notification_handles.lock().await;
        for (_, handle) in handles.drain() {
            handle.abort();
        }
    }
}

/// Run a btleplug call, failing with [`Error::Timeout`] after `limit`.
async fn bounded<T, F>(operation: &str, limit: Duration, fut: F) -> Result<T>
where
    F: std::future::Future<Output = std::result::Result<T, btleplug::Error>>,
{
    Ok(timeout(limit, fut)
        .await
        .map_err(|_| Error::timeout(operation, limit))??)
}

#[async_trait]
impl GattConnection for BleConnection {
    fn address(&self) -> &str {
        &self.address
    }

    #[tracing::instrument(level = "debug", skip(self), fields(address = %self.address))]
    async fn connect(&self) -> Result<()> {
        if self.is_connected().await {
            return Ok(());
        }
        info!("Connecting to device...");
        bounded(
            "connect to device",
            self.config.connection_timeout,
            self.peripheral.connect(),
        )
        .await?;
        info!("Connected");
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        bounded(
            "query connection state",
            self.config.write_timeout,
            self.peripheral.is_connected(),
        )
        .await
        .unwrap_or(false)
    }

    #[tracing::instrument(level = "debug", skip(self), fields(address = %self.address))]
    async fn disconnect(&self) -> Result<()> {
        self.abort_notifications().await;
        bounded(
            "disconnect",
            self.config.connection_timeout,
            self.peripheral.disconnect(),
        )
        .await?;
        debug!("Disconnected");
        Ok(())
    }

    async fn discover(&self) -> Result<GattTable> {
        bounded(
            "discover services",
            self.config.discovery_timeout,
            self.peripheral.discover_services(),
        )
        .await?;

        let services = self.peripheral.services();
        debug!("Found {} services", services.len());

        let mut table = GattTable::new();
        let mut cache = self.characteristics.write().await;
        for service in &services {
            table.add_characteristics(service.uuid, service.characteristics.iter().map(|c| c.uuid));
            for characteristic in &service.characteristics {
                cache.insert(characteristic.uuid, characteristic.clone());
            }
        }
        Ok(table)
    }

    async fn clear_cache(&self) -> Result<()> {
        // btleplug re-reads the table on the next discover_services call.
        let mut cache = self.characteristics.write().await;
        debug!(address = %self.address, cached = cache.len(), "Clearing GATT cache");
        cache.clear();
        Ok(())
    }

    async fn subscribe(&self, characteristic: Uuid, handler: NotificationHandler) -> Result<()> {
        let target = self.find_characteristic(characteristic).await?;
        let mut stream = bounded(
            "open notification stream",
            self.config.write_timeout,
            self.peripheral.notifications(),
        )
        .await?;
        bounded(
            "subscribe",
            self.config.write_timeout,
            self.peripheral.subscribe(&target),
        )
        .await?;

        let handle = tokio::spawn(async move {
            while let Some(notification) = stream.next().await {
                if notification.uuid == characteristic {
                    handler(&notification.value);
                }
            }
        });

        if let Some(previous) = self
            .notification_handles
            .lock()
            .await
            .insert(characteristic, handle)
        {
            previous.abort();
        }
        Ok(())
    }

    async fn unsubscribe(&self, characteristic: Uuid) -> Result<()> {
        if let Some(handle) = self.notification_handles.lock().await.remove(&characteristic) {
            handle.abort();
        }
        let target = self.find_characteristic(characteristic).await?;
        bounded(
            "unsubscribe",
            self.config.write_timeout,
            self.peripheral.unsubscribe(&target),
        )
        .await
    }

    async fn write(&self, characteristic: Uuid, data: &[u8]) -> Result<()> {
        let target = self.find_characteristic(characteristic).await?;
        bounded(
            "write characteristic",
            self.config.write_timeout,
            self.peripheral.write(&target, data, self.config.write_type()),
        )
        .await
        .map_err(|e| match e {
            Error::Bluetooth(inner) => Error::WriteFailed {
                uuid: characteristic.to_string(),
                reason: inner.to_string(),
            },
            other => other,
        })
    }
}
