//! Mock transport for testing.
//!
//! [`MockConnection`] implements [`GattConnection`] and [`MockLocator`]
//! implements [`DeviceLocator`], so the command session, device session and
//! coordinator can be exercised without BLE hardware.
//!
//! # Features
//!
//! - **Call accounting**: counters per operation and an ordered call log
//! - **Scripted responses**: immediate or delayed, plus stray notifications
//!   before the write and extra ones after the response
//! - **GATT table edits**: drop the vendor service or single characteristics
//! - **Failure injection**: connect, discover, write and unsubscribe
//!
//! Clones share state, so a test can hand one clone to the session and
//! inspect the other afterwards.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use vson_types::uuids::{COMMAND, GAP_SERVICE, NOTIFY, VENDOR_SERVICE};

use crate::error::{ConnectionFailureReason, Error, Result};
use crate::traits::{DeviceLocator, GattConnection, GattTable, NotificationHandler};
use crate::util::{normalize_address, same_address};

/// Connect timeout reported by [`MockConnection::with_connect_timeout`].
const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

type SharedHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Operation recorded in the call log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockCall {
    /// `connect`
    Connect,
    /// `discover`
    Discover,
    /// `subscribe`
    Subscribe,
    /// `unsubscribe`
    Unsubscribe,
    /// `write`
    Write,
    /// `clear_cache`
    ClearCache,
    /// `disconnect`
    Disconnect,
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct MockState {
    address: String,
    connected: AtomicBool,
    calls: Mutex<Vec<MockCall>>,
    written: Mutex<Vec<Vec<u8>>>,
    table: Mutex<GattTable>,
    handler: Mutex<Option<SharedHandler>>,
    response: Mutex<Option<Vec<u8>>>,
    stray: Mutex<Option<Vec<u8>>>,
    extra: Mutex<Option<Vec<u8>>>,
    /// Simulated response latency in milliseconds (0 = deliver during write).
    response_delay_ms: AtomicU64,
    /// Number of connect attempts to fail before succeeding.
    remaining_connect_failures: AtomicU32,
    /// Connect attempts hit the transport's connect timeout.
    timeout_connect: AtomicBool,
    fail_discover: AtomicBool,
    fail_writes: AtomicBool,
    fail_unsubscribe: AtomicBool,
}

/// A mock GATT connection.
///
/// # Example
///
/// ```
/// use vson_core::{Command, CommandSession, MockConnection, SessionConfig};
///
/// #[tokio::main]
/// async fn main() {
///     let conn = MockConnection::new("AA:BB:CC:DD:EE:FF").with_response(vec![0u8; 18]);
///     let mut session = CommandSession::new(conn.clone(), SessionConfig::default());
///     let frame = session.request(Command::ReadMeasurement).await.unwrap();
///     assert_eq!(frame.len(), 18);
///     assert_eq!(conn.disconnect_count(), 1);
/// }
/// ```
#[derive(Clone)]
pub struct MockConnection {
    state: Arc<MockState>,
}

impl std::fmt::Debug for MockConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockConnection")
            .field("address", &self.state.address)
            .field("connected", &self.state.connected.load(Ordering::Relaxed))
            .field("calls", &lock(&self.state.calls).len())
            .finish()
    }
}

impl MockConnection {
    /// Create a mock exposing the vendor GATT table and no scripted response.
    pub fn new(address: &str) -> Self {
        let table = GattTable::new()
            .with_service(GAP_SERVICE, [])
            .with_service(VENDOR_SERVICE, [COMMAND, NOTIFY]);
        Self {
            state: Arc::new(MockState {
                address: normalize_address(address),
                connected: AtomicBool::new(false),
                calls: Mutex::new(Vec::new()),
                written: Mutex::new(Vec::new()),
                table: Mutex::new(table),
                handler: Mutex::new(None),
                response: Mutex::new(None),
                stray: Mutex::new(None),
                extra: Mutex::new(None),
                response_delay_ms: AtomicU64::new(0),
                remaining_connect_failures: AtomicU32::new(0),
                timeout_connect: AtomicBool::new(false),
                fail_discover: AtomicBool::new(false),
                fail_writes: AtomicBool::new(false),
                fail_unsubscribe: AtomicBool::new(false),
            }),
        }
    }

    // --- Builder methods ---

    /// Answer every write with `frame`.
    #[must_use]
    pub fn with_response(self, frame: Vec<u8>) -> Self {
        self.set_response(frame);
        self
    }

    /// Deliver the response after `delay` instead of during the write.
    #[must_use]
    pub fn with_response_delay(self, delay: Duration) -> Self {
        self.state
            .response_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
        self
    }

    /// Notify `payload` as soon as a handler is subscribed.
    #[must_use]
    pub fn with_stray_notification(self, payload: Vec<u8>) -> Self {
        *lock(&self.state.stray) = Some(payload);
        self
    }

    /// Notify `payload` right after every response.
    #[must_use]
    pub fn with_extra_notification(self, payload: Vec<u8>) -> Self {
        *lock(&self.state.extra) = Some(payload);
        self
    }

    /// Remove a vendor characteristic from the GATT table.
    #[must_use]
    pub fn without_characteristic(self, characteristic: Uuid) -> Self {
        let mut table = GattTable::new().with_service(GAP_SERVICE, []);
        let remaining = [COMMAND, NOTIFY]
            .into_iter()
            .filter(|c| *c != characteristic);
        table.add_characteristics(VENDOR_SERVICE, remaining);
        *lock(&self.state.table) = table;
        self
    }

    /// Remove the vendor service from the GATT table.
    #[must_use]
    pub fn without_vendor_service(self) -> Self {
        *lock(&self.state.table) = GattTable::new().with_service(GAP_SERVICE, []);
        self
    }

    /// Fail the next `count` connect attempts.
    #[must_use]
    pub fn with_connect_failures(self, count: u32) -> Self {
        self.state
            .remaining_connect_failures
            .store(count, Ordering::SeqCst);
        self
    }

    /// Fail every connect attempt with a connect timeout.
    #[must_use]
    pub fn with_connect_timeout(self) -> Self {
        self.state.timeout_connect.store(true, Ordering::SeqCst);
        self
    }

    /// Fail service discovery with a raw Bluetooth error.
    #[must_use]
    pub fn with_discover_failure(self) -> Self {
        self.state.fail_discover.store(true, Ordering::SeqCst);
        self
    }

    /// Fail every write.
    #[must_use]
    pub fn with_write_failure(self) -> Self {
        self.state.fail_writes.store(true, Ordering::SeqCst);
        self
    }

    /// Fail every unsubscribe.
    #[must_use]
    pub fn with_unsubscribe_failure(self) -> Self {
        self.state.fail_unsubscribe.store(true, Ordering::SeqCst);
        self
    }

    // --- Test control methods ---

    /// Replace the scripted response.
    pub fn set_response(&self, frame: Vec<u8>) {
        *lock(&self.state.response) = Some(frame);
    }

    /// Remove the scripted response; writes go unanswered.
    pub fn clear_response(&self) {
        *lock(&self.state.response) = None;
    }

    /// Whether the mock link is up.
    pub fn is_link_up(&self) -> bool {
        self.state.connected.load(Ordering::SeqCst)
    }

    /// Ordered log of every call.
    pub fn calls(&self) -> Vec<MockCall> {
        lock(&self.state.calls).clone()
    }

    /// Payloads written, in order.
    pub fn written(&self) -> Vec<Vec<u8>> {
        lock(&self.state.written).clone()
    }

    fn count(&self, call: MockCall) -> u32 {
        lock(&self.state.calls).iter().filter(|c| **c == call).count() as u32
    }

    /// Number of `connect` calls.
    pub fn connect_count(&self) -> u32 {
        self.count(MockCall::Connect)
    }

    /// Number of `disconnect` calls.
    pub fn disconnect_count(&self) -> u32 {
        self.count(MockCall::Disconnect)
    }

    /// Number of `subscribe` calls.
    pub fn subscribe_count(&self) -> u32 {
        self.count(MockCall::Subscribe)
    }

    /// Number of `unsubscribe` calls.
    pub fn unsubscribe_count(&self) -> u32 {
        self.count(MockCall::Unsubscribe)
    }

    /// Number of `write` calls.
    pub fn write_count(&self) -> u32 {
        self.count(MockCall::Write)
    }

    /// Number of `clear_cache` calls.
    pub fn clear_cache_count(&self) -> u32 {
        self.count(MockCall::ClearCache)
    }

    fn record(&self, call: MockCall) {
        lock(&self.state.calls).push(call);
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.is_link_up() {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }

    fn deliver_response(&self) {
        let Some(handler) = lock(&self.state.handler).clone() else {
            return;
        };
        let Some(response) = lock(&self.state.response).clone() else {
            return;
        };
        let extra = lock(&self.state.extra).clone();
        let delay = Duration::from_millis(self.state.response_delay_ms.load(Ordering::SeqCst));

        let notify = move || {
            handler(&response);
            if let Some(extra) = extra {
                handler(&extra);
            }
        };
        if delay.is_zero() {
            notify();
        } else {
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                notify();
            });
        }
    }
}

#[async_trait]
impl GattConnection for MockConnection {
    fn address(&self) -> &str {
        &self.state.address
    }

    async fn connect(&self) -> Result<()> {
        self.record(MockCall::Connect);
        if self.state.timeout_connect.load(Ordering::SeqCst) {
            return Err(Error::timeout("connect to device", CONNECT_TIMEOUT));
        }
        let remaining = self.state.remaining_connect_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.state
                .remaining_connect_failures
                .store(remaining - 1, Ordering::SeqCst);
            return Err(Error::connection_failed(
                Some(self.state.address.clone()),
                ConnectionFailureReason::OutOfRange,
            ));
        }
        self.state.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.is_link_up()
    }

    async fn disconnect(&self) -> Result<()> {
        self.record(MockCall::Disconnect);
        self.state.connected.store(false, Ordering::SeqCst);
        lock(&self.state.handler).take();
        Ok(())
    }

    async fn discover(&self) -> Result<GattTable> {
        self.record(MockCall::Discover);
        self.ensure_connected()?;
        if self.state.fail_discover.load(Ordering::SeqCst) {
            return Err(Error::Bluetooth(btleplug::Error::RuntimeError(
                "mock discovery failure".to_string(),
            )));
        }
        Ok(lock(&self.state.table).clone())
    }

    async fn clear_cache(&self) -> Result<()> {
        self.record(MockCall::ClearCache);
        Ok(())
    }

    async fn subscribe(&self, characteristic: Uuid, handler: NotificationHandler) -> Result<()> {
        self.record(MockCall::Subscribe);
        self.ensure_connected()?;
        let table = lock(&self.state.table).clone();
        if !table.has_characteristic(VENDOR_SERVICE, characteristic) {
            return Err(Error::characteristic_not_found(
                characteristic,
                table.service_count(),
            ));
        }
        let handler: SharedHandler = Arc::from(handler);
        *lock(&self.state.handler) = Some(Arc::clone(&handler));
        if let Some(stray) = lock(&self.state.stray).clone() {
            handler(&stray);
        }
        Ok(())
    }

    async fn unsubscribe(&self, _characteristic: Uuid) -> Result<()> {
        self.record(MockCall::Unsubscribe);
        if self.state.fail_unsubscribe.load(Ordering::SeqCst) {
            return Err(Error::Bluetooth(btleplug::Error::NotConnected));
        }
        lock(&self.state.handler).take();
        Ok(())
    }

    async fn write(&self, characteristic: Uuid, data: &[u8]) -> Result<()> {
        self.record(MockCall::Write);
        self.ensure_connected()?;
        if self.state.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::WriteFailed {
                uuid: characteristic.to_string(),
                reason: "mock write failure".to_string(),
            });
        }
        lock(&self.state.written).push(data.to_vec());
        self.deliver_response();
        Ok(())
    }
}

/// A mock locator handing out registered [`MockConnection`]s.
#[derive(Debug, Clone, Default)]
pub struct MockLocator {
    devices: Arc<Mutex<HashMap<String, MockConnection>>>,
    lookups: Arc<AtomicU32>,
}

impl MockLocator {
    /// Create an empty locator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `connection` reachable under its address.
    pub fn insert(&self, connection: MockConnection) {
        lock(&self.devices).insert(connection.address().to_string(), connection);
    }

    /// Make the device at `address` unreachable.
    pub fn remove(&self, address: &str) -> Option<MockConnection> {
        lock(&self.devices).remove(&normalize_address(address))
    }

    /// Number of `find_connectable` calls.
    pub fn lookup_count(&self) -> u32 {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceLocator for MockLocator {
    type Connection = MockConnection;

    async fn find_connectable(&self, address: &str) -> Option<MockConnection> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        lock(&self.devices)
            .values()
            .find(|c| same_address(c.address(), address))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_records_calls() {
        let conn = MockConnection::new("aa:bb:cc:dd:ee:ff");
        assert_eq!(conn.address(), "AA:BB:CC:DD:EE:FF");

        conn.connect().await.unwrap();
        assert!(conn.is_connected().await);
        conn.discover().await.unwrap();
        conn.disconnect().await.unwrap();

        assert_eq!(
            conn.calls(),
            vec![MockCall::Connect, MockCall::Discover, MockCall::Disconnect]
        );
        assert!(!conn.is_link_up());
    }

    #[tokio::test]
    async fn test_mock_requires_connection() {
        let conn = MockConnection::new("AA:BB:CC:DD:EE:FF");
        assert!(matches!(conn.discover().await, Err(Error::NotConnected)));
        assert!(matches!(
            conn.write(COMMAND, &[0xAB]).await,
            Err(Error::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_mock_connect_failures_then_success() {
        let conn = MockConnection::new("AA:BB:CC:DD:EE:FF").with_connect_failures(2);
        assert!(conn.connect().await.is_err());
        assert!(conn.connect().await.is_err());
        assert!(conn.connect().await.is_ok());
        assert_eq!(conn.connect_count(), 3);
    }

    #[tokio::test]
    async fn test_mock_delivers_response_on_write() {
        let conn = MockConnection::new("AA:BB:CC:DD:EE:FF").with_response(vec![1, 2, 3]);
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);

        conn.connect().await.unwrap();
        conn.subscribe(NOTIFY, Box::new(move |d: &[u8]| lock(&sink).push(d.to_vec())))
            .await
            .unwrap();
        conn.write(COMMAND, &[0xAB]).await.unwrap();

        assert_eq!(*lock(&received), vec![vec![1, 2, 3]]);
        assert_eq!(conn.written(), vec![vec![0xAB]]);
    }

    #[tokio::test]
    async fn test_mock_missing_characteristic() {
        let conn = MockConnection::new("AA:BB:CC:DD:EE:FF").without_characteristic(COMMAND);
        conn.connect().await.unwrap();
        let table = conn.discover().await.unwrap();
        assert!(table.has_characteristic(VENDOR_SERVICE, NOTIFY));
        assert!(!table.has_characteristic(VENDOR_SERVICE, COMMAND));
    }

    #[tokio::test]
    async fn test_locator_lookup() {
        let locator = MockLocator::new();
        locator.insert(MockConnection::new("AA:BB:CC:DD:EE:FF"));

        assert!(locator.find_connectable("aa:bb:cc:dd:ee:ff").await.is_some());
        assert!(locator.is_connectable("AA:BB:CC:DD:EE:FF").await);
        assert!(locator.find_connectable("11:22:33:44:55:66").await.is_none());
        assert_eq!(locator.lookup_count(), 3);

        locator.remove("AA:BB:CC:DD:EE:FF");
        assert!(!locator.is_connectable("AA:BB:CC:DD:EE:FF").await);
    }
}
