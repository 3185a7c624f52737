//! Command session: one request/response exchange over a GATT connection.
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Subscribed -> AwaitingResponse
//!     -> { ResponseReceived | TimedOut | TransportError }
//!     -> Unsubscribing -> Disconnected
//! ```
//!
//! Every exit path ends in `Unsubscribing -> Disconnected`. The link is
//! released exactly once on every branch that established it, including when
//! unsubscribing fails. A failed connect acquires nothing and releases nothing.
//!
//! Subscription always precedes the write. The response latch is armed right
//! before the command is written, so notifications delivered earlier are
//! ignored, and only the first notification after arming is accepted.
//!
//! A missing vendor service or characteristic means a stale GATT cache: the
//! session clears the cache and disconnects before returning the error.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, trace, warn};

use vson_types::uuids::{COMMAND, NOTIFY, VENDOR_SERVICE};

use crate::commands::Command;
use crate::error::{Error, Result};
use crate::retry::{RetryConfig, with_retry};
use crate::traits::{GattConnection, GattTable};

/// Default wait for the response notification.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default delay after each written chunk.
pub const DEFAULT_CHUNK_DELAY: Duration = Duration::from_millis(50);

/// Default delay between subscribing and writing the command.
pub const DEFAULT_SUBSCRIBE_SETTLE: Duration = Duration::from_millis(500);

/// State of a command session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// No link. Initial and terminal state.
    Disconnected,
    /// Link being established.
    Connecting,
    /// Link up, GATT table verified.
    Connected,
    /// Notification handler registered.
    Subscribed,
    /// Command written, waiting for the response.
    AwaitingResponse,
    /// Response latched.
    ResponseReceived,
    /// No response within the response timeout.
    TimedOut,
    /// Connect, GATT or write failure.
    TransportError,
    /// Tearing down the subscription and the link.
    Unsubscribing,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Subscribed => "subscribed",
            SessionState::AwaitingResponse => "awaiting_response",
            SessionState::ResponseReceived => "response_received",
            SessionState::TimedOut => "timed_out",
            SessionState::TransportError => "transport_error",
            SessionState::Unsubscribing => "unsubscribing",
        };
        f.write_str(name)
    }
}

/// Configuration for a command session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Bounded wait for the response notification.
    pub response_timeout: Duration,
    /// Bytes per write. `None` writes the whole command at once.
    pub chunk_size: Option<usize>,
    /// Delay after each written chunk.
    pub chunk_delay: Duration,
    /// Delay between subscribing and writing.
    pub subscribe_settle: Duration,
    /// Retry policy of the connection helper.
    pub connect_retry: RetryConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            chunk_size: None,
            chunk_delay: DEFAULT_CHUNK_DELAY,
            subscribe_settle: DEFAULT_SUBSCRIBE_SETTLE,
            connect_retry: RetryConfig::for_connect(),
        }
    }
}

impl SessionConfig {
    /// Create a new session configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the response timeout.
    #[must_use]
    pub fn response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Set the write chunk size.
    #[must_use]
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = Some(size.max(1));
        self
    }

    /// Set the inter-chunk delay.
    #[must_use]
    pub fn chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    /// Set the post-subscribe settle delay.
    #[must_use]
    pub fn subscribe_settle(mut self, delay: Duration) -> Self {
        self.subscribe_settle = delay;
        self
    }

    /// Set the connection retry policy.
    #[must_use]
    pub fn connect_retry(mut self, retry: RetryConfig) -> Self {
        self.connect_retry = retry;
        self
    }
}

/// Single-slot response latch shared with the notification handler.
struct ResponseLatch {
    armed: AtomicBool,
    slot: Mutex<Option<oneshot::Sender<Vec<u8>>>>,
}

impl ResponseLatch {
    fn new() -> (Arc<Self>, oneshot::Receiver<Vec<u8>>) {
        let (tx, rx) = oneshot::channel();
        let latch = Arc::new(Self {
            armed: AtomicBool::new(false),
            slot: Mutex::new(Some(tx)),
        });
        (latch, rx)
    }

    fn arm(&self) {
        self.armed.store(true, Ordering::Release);
    }

    /// Offer a notification payload. Returns true if it was latched.
    fn offer(&self, data: &[u8]) -> bool {
        if !self.armed.load(Ordering::Acquire) {
            trace!(len = data.len(), "Ignoring notification received before command write");
            return false;
        }
        let sender = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match sender {
            Some(tx) => tx.send(data.to_vec()).is_ok(),
            None => {
                trace!(len = data.len(), "Ignoring extra notification");
                false
            }
        }
    }
}

/// Drives one command exchange over an exclusively owned connection.
///
/// A session can run several exchanges in sequence; each starts and ends in
/// [`SessionState::Disconnected`].
pub struct CommandSession<C> {
    connection: C,
    config: SessionConfig,
    state: SessionState,
    transitions: Vec<SessionState>,
    link_up: bool,
    subscribed: bool,
}

impl<C: GattConnection> CommandSession<C> {
    /// Create a session owning `connection`.
    pub fn new(connection: C, config: SessionConfig) -> Self {
        Self {
            connection,
            config,
            state: SessionState::Disconnected,
            transitions: vec![SessionState::Disconnected],
            link_up: false,
            subscribed: false,
        }
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// States visited by the last exchange, in order.
    pub fn transitions(&self) -> &[SessionState] {
        &self.transitions
    }

    /// The owned connection.
    pub fn connection(&self) -> &C {
        &self.connection
    }

    /// Release the connection handle.
    pub fn into_connection(self) -> C {
        self.connection
    }

    /// Send `command` and return the raw response frame.
    ///
    /// Fails with [`Error::ResponseTimeout`] when no notification arrives within the
    /// response timeout. The link is torn down before any result is returned.
    #[tracing::instrument(level = "debug", skip(self), fields(address = %self.connection.address()))]
    pub async fn request(&mut self, command: Command) -> Result<Vec<u8>> {
        self.begin();
        let result = self.exchange(command).await;
        let result = self.settle(result).await;
        self.teardown().await;
        result
    }

    /// Connect, enumerate the GATT table and disconnect.
    ///
    /// Confirms the device is alive and still exposes the vendor service.
    #[tracing::instrument(level = "debug", skip(self), fields(address = %self.connection.address()))]
    pub async fn verify(&mut self) -> Result<GattTable> {
        self.begin();
        let result = self.probe().await;
        let result = self.settle(result).await;
        self.teardown().await;
        result
    }

    async fn exchange(&mut self, command: Command) -> Result<Vec<u8>> {
        self.connect().await?;
        self.check_vendor_table().await?;
        self.transition(SessionState::Connected);

        let (latch, response) = ResponseLatch::new();
        let handler_latch = Arc::clone(&latch);
        self.connection
            .subscribe(
                NOTIFY,
                Box::new(move |data: &[u8]| {
                    handler_latch.offer(data);
                }),
            )
            .await?;
        self.subscribed = true;
        self.transition(SessionState::Subscribed);
        sleep(self.config.subscribe_settle).await;

        latch.arm();
        self.write_command(&command.as_bytes()).await?;
        self.transition(SessionState::AwaitingResponse);
        debug!("Sent {}", command);

        match timeout(self.config.response_timeout, response).await {
            Ok(Ok(frame)) => Ok(frame),
            // Handler dropped without a payload: the transport lost the link.
            Ok(Err(_)) => Err(Error::NotConnected),
            Err(_) => Err(Error::response_timeout(self.config.response_timeout)),
        }
    }

    async fn probe(&mut self) -> Result<GattTable> {
        self.connect().await?;
        let table = self.check_vendor_table().await?;
        self.transition(SessionState::Connected);
        debug!(services = table.service_count(), "Device alive");
        Ok(table)
    }

    async fn connect(&mut self) -> Result<()> {
        self.transition(SessionState::Connecting);
        let connection = &self.connection;
        with_retry(&self.config.connect_retry, "connect", || connection.connect()).await?;
        self.link_up = true;
        Ok(())
    }

    async fn check_vendor_table(&self) -> Result<GattTable> {
        let table = self.connection.discover().await?;
        if !table.has_service(VENDOR_SERVICE) {
            return Err(Error::service_not_found(VENDOR_SERVICE));
        }
        for characteristic in [COMMAND, NOTIFY] {
            if !table.has_characteristic(VENDOR_SERVICE, characteristic) {
                return Err(Error::characteristic_not_found(
                    characteristic,
                    table.service_count(),
                ));
            }
        }
        Ok(table)
    }

    async fn write_command(&self, payload: &[u8]) -> Result<()> {
        let chunk_size = self.config.chunk_size.unwrap_or(payload.len()).max(1);
        for chunk in payload.chunks(chunk_size) {
            self.connection.write(COMMAND, chunk).await?;
            sleep(self.config.chunk_delay).await;
        }
        Ok(())
    }

    /// Record the outcome state and heal a stale GATT cache.
    async fn settle<T>(&mut self, result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => {
                if self.state == SessionState::AwaitingResponse {
                    self.transition(SessionState::ResponseReceived);
                }
                Ok(value)
            }
            Err(err) => {
                if err.is_timeout() && self.state == SessionState::AwaitingResponse {
                    self.transition(SessionState::TimedOut);
                    info!("No response within {:?}", self.config.response_timeout);
                } else {
                    self.transition(SessionState::TransportError);
                    debug!("Exchange failed: {}", err);
                }
                if err.is_stale_gatt() {
                    self.drop_stale_link().await;
                }
                Err(err)
            }
        }
    }

    /// Clear the characteristic cache and drop the link.
    async fn drop_stale_link(&mut self) {
        warn!("Vendor GATT table missing, clearing cache and disconnecting");
        if !self.connection.is_connected().await {
            self.link_up = false;
            return;
        }
        if let Err(e) = self.connection.clear_cache().await {
            warn!("Failed to clear characteristic cache: {}", e);
        }
        if let Err(e) = self.connection.disconnect().await {
            warn!("Failed to disconnect after stale GATT table: {}", e);
        }
        self.link_up = false;
    }

    /// Unsubscribe and disconnect. Runs on every exit path.
    async fn teardown(&mut self) {
        self.transition(SessionState::Unsubscribing);
        if self.subscribed && self.link_up {
            if let Err(e) = self.connection.unsubscribe(NOTIFY).await {
                warn!("Failed to unsubscribe: {}", e);
            }
        }
        self.subscribed = false;
        if self.link_up {
            if let Err(e) = self.connection.disconnect().await {
                warn!("Failed to disconnect: {}", e);
            }
            self.link_up = false;
        }
        self.transition(SessionState::Disconnected);
    }

    fn begin(&mut self) {
        self.transitions.clear();
        self.state = SessionState::Disconnected;
        self.transitions.push(SessionState::Disconnected);
    }

    fn transition(&mut self, next: SessionState) {
        trace!("{} -> {}", self.state, next);
        self.state = next;
        self.transitions.push(next);
    }
}

impl<C: GattConnection> fmt::Debug for CommandSession<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandSession")
            .field("address", &self.connection.address())
            .field("state", &self.state)
            .field("link_up", &self.link_up)
            .field("subscribed", &self.subscribed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::FailureKind;
    use crate::mock::{MockCall, MockConnection};
    use SessionState::*;

    const FRAME: [u8; 18] = [
        0x0a, 0x00, 0x01, 0x01, 0x0e, 0x02, 0x01, 0x09, 0x08, 0x00, 0x00, 0x65, 0x00, 0x0f, 0x01,
        0x00, 0x02, 0x51,
    ];

    fn config() -> SessionConfig {
        SessionConfig::default().connect_retry(RetryConfig::none())
    }

    #[test]
    fn test_session_config_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.response_timeout, Duration::from_secs(5));
        assert_eq!(config.chunk_delay, Duration::from_millis(50));
        assert_eq!(config.subscribe_settle, Duration::from_millis(500));
        assert_eq!(config.chunk_size, None);
        assert_eq!(SessionConfig::new().chunk_size(0).chunk_size, Some(1));
    }

    #[test]
    fn test_latch_ignores_until_armed_and_accepts_once() {
        let (latch, mut rx) = ResponseLatch::new();
        assert!(!latch.offer(&[1]));
        latch.arm();
        assert!(latch.offer(&[2]));
        assert!(!latch.offer(&[3]));
        assert_eq!(rx.try_recv().unwrap(), vec![2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_success_path() {
        let conn = MockConnection::new("AA:BB:CC:DD:EE:FF").with_response(FRAME.to_vec());
        let mut session = CommandSession::new(conn.clone(), config());

        let frame = session.request(Command::ReadMeasurement).await.unwrap();

        assert_eq!(frame, FRAME.to_vec());
        assert_eq!(
            session.transitions(),
            &[
                Disconnected,
                Connecting,
                Connected,
                Subscribed,
                AwaitingResponse,
                ResponseReceived,
                Unsubscribing,
                Disconnected
            ]
        );
        assert_eq!(conn.disconnect_count(), 1);
        assert_eq!(conn.unsubscribe_count(), 1);
        assert_eq!(conn.written(), vec![vec![0xAB]]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_precedes_write() {
        let conn = MockConnection::new("AA:BB:CC:DD:EE:FF").with_response(FRAME.to_vec());
        let mut session = CommandSession::new(conn.clone(), config());
        session.request(Command::ReadMeasurement).await.unwrap();

        let calls = conn.calls();
        let subscribe = calls.iter().position(|c| *c == MockCall::Subscribe).unwrap();
        let write = calls.iter().position(|c| *c == MockCall::Write).unwrap();
        let unsubscribe = calls.iter().position(|c| *c == MockCall::Unsubscribe).unwrap();
        let disconnect = calls.iter().position(|c| *c == MockCall::Disconnect).unwrap();
        assert!(subscribe < write);
        assert!(write < unsubscribe);
        assert!(unsubscribe < disconnect);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_still_tears_down() {
        let conn = MockConnection::new("AA:BB:CC:DD:EE:FF");
        let mut session = CommandSession::new(conn.clone(), config());

        let err = session.request(Command::ReadMeasurement).await.unwrap_err();

        assert!(err.is_timeout());
        assert!(session.transitions().ends_with(&[TimedOut, Unsubscribing, Disconnected]));
        assert_eq!(conn.disconnect_count(), 1);
        assert_eq!(conn.unsubscribe_count(), 1);
        assert!(!conn.is_link_up());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stray_notification_before_write_is_ignored() {
        let conn = MockConnection::new("AA:BB:CC:DD:EE:FF")
            .with_stray_notification(vec![0xFF; 18])
            .with_response(FRAME.to_vec());
        let mut session = CommandSession::new(conn, config());

        let frame = session.request(Command::ReadMeasurement).await.unwrap();
        assert_eq!(frame, FRAME.to_vec());
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_first_notification_is_latched() {
        let conn = MockConnection::new("AA:BB:CC:DD:EE:FF")
            .with_response(FRAME.to_vec())
            .with_extra_notification(vec![0x00; 18]);
        let mut session = CommandSession::new(conn, config());

        let frame = session.request(Command::ReadMeasurement).await.unwrap();
        assert_eq!(frame, FRAME.to_vec());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_characteristic_clears_cache_and_disconnects() {
        let conn = MockConnection::new("AA:BB:CC:DD:EE:FF").without_characteristic(NOTIFY);
        let mut session = CommandSession::new(conn.clone(), config());

        let err = session.request(Command::ReadMeasurement).await.unwrap_err();

        assert!(err.is_stale_gatt());
        assert_eq!(conn.clear_cache_count(), 1);
        assert_eq!(conn.disconnect_count(), 1);
        assert_eq!(conn.subscribe_count(), 0);
        assert_eq!(conn.write_count(), 0);
        assert_eq!(session.state(), Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsubscribe_failure_still_disconnects() {
        let conn = MockConnection::new("AA:BB:CC:DD:EE:FF")
            .with_response(FRAME.to_vec())
            .with_unsubscribe_failure();
        let mut session = CommandSession::new(conn.clone(), config());

        assert!(session.request(Command::ReadMeasurement).await.is_ok());
        assert_eq!(conn.disconnect_count(), 1);
        assert_eq!(session.state(), Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_failure_tears_down() {
        let conn = MockConnection::new("AA:BB:CC:DD:EE:FF").with_write_failure();
        let mut session = CommandSession::new(conn.clone(), config());

        let err = session.request(Command::ReadMeasurement).await.unwrap_err();

        assert!(matches!(err, Error::WriteFailed { .. }));
        assert!(session.transitions().ends_with(&[
            Subscribed,
            TransportError,
            Unsubscribing,
            Disconnected
        ]));
        assert_eq!(conn.unsubscribe_count(), 1);
        assert_eq!(conn.disconnect_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_failure_does_not_disconnect() {
        let conn = MockConnection::new("AA:BB:CC:DD:EE:FF").with_connect_failures(1);
        let mut session = CommandSession::new(conn.clone(), config());

        let err = session.request(Command::ReadMeasurement).await.unwrap_err();

        assert!(matches!(err, Error::ConnectionFailed { .. }));
        assert_eq!(
            session.transitions(),
            &[Disconnected, Connecting, TransportError, Unsubscribing, Disconnected]
        );
        assert_eq!(conn.disconnect_count(), 0);
        assert_eq!(conn.subscribe_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout_is_transport_error() {
        let conn = MockConnection::new("AA:BB:CC:DD:EE:FF").with_connect_timeout();
        let mut session = CommandSession::new(conn.clone(), config());

        let err = session.request(Command::ReadMeasurement).await.unwrap_err();

        assert!(matches!(err, Error::Timeout { .. }));
        assert!(!err.is_timeout());
        assert_eq!(FailureKind::of(&err), FailureKind::Transport);
        assert_eq!(
            session.transitions(),
            &[Disconnected, Connecting, TransportError, Unsubscribing, Disconnected]
        );
        assert_eq!(conn.disconnect_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_retried_by_helper() {
        let conn = MockConnection::new("AA:BB:CC:DD:EE:FF")
            .with_connect_failures(1)
            .with_response(FRAME.to_vec());
        let retry = RetryConfig::new(1).jitter(false);
        let mut session = CommandSession::new(conn.clone(), config().connect_retry(retry));

        assert!(session.request(Command::ReadMeasurement).await.is_ok());
        assert_eq!(conn.connect_count(), 2);
        assert_eq!(conn.disconnect_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_byte_command_is_one_chunk() {
        let conn = MockConnection::new("AA:BB:CC:DD:EE:FF").with_response(FRAME.to_vec());
        let mut session = CommandSession::new(conn.clone(), config().chunk_size(1));
        session.request(Command::Calibrate).await.unwrap();
        assert_eq!(conn.written(), vec![vec![0xAD]]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_payload_split_into_delayed_chunks() {
        let conn = MockConnection::new("AA:BB:CC:DD:EE:FF");
        conn.connect().await.unwrap();
        let session = CommandSession::new(conn.clone(), config().chunk_size(2));

        let start = tokio::time::Instant::now();
        session.write_command(&[1, 2, 3, 4, 5]).await.unwrap();

        assert_eq!(conn.written(), vec![vec![1, 2], vec![3, 4], vec![5]]);
        assert_eq!(start.elapsed(), DEFAULT_CHUNK_DELAY * 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_whole_payload_without_chunk_size() {
        let conn = MockConnection::new("AA:BB:CC:DD:EE:FF");
        conn.connect().await.unwrap();
        let session = CommandSession::new(conn.clone(), config());

        session.write_command(&[1, 2, 3, 4, 5]).await.unwrap();

        assert_eq!(conn.written(), vec![vec![1, 2, 3, 4, 5]]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_verify_connects_and_disconnects() {
        let conn = MockConnection::new("AA:BB:CC:DD:EE:FF");
        let mut session = CommandSession::new(conn.clone(), config());

        let table = session.verify().await.unwrap();

        assert!(table.has_service(VENDOR_SERVICE));
        assert_eq!(conn.subscribe_count(), 0);
        assert_eq!(conn.write_count(), 0);
        assert_eq!(conn.disconnect_count(), 1);
        assert_eq!(session.state(), Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_verify_missing_service_is_stale() {
        let conn = MockConnection::new("AA:BB:CC:DD:EE:FF").without_vendor_service();
        let mut session = CommandSession::new(conn.clone(), config());

        let err = session.verify().await.unwrap_err();

        assert!(matches!(err, Error::ServiceNotFound { .. }));
        assert_eq!(conn.clear_cache_count(), 1);
        assert_eq!(conn.disconnect_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_reusable_after_failure() {
        let conn = MockConnection::new("AA:BB:CC:DD:EE:FF");
        let mut session = CommandSession::new(conn.clone(), config());
        assert!(session.request(Command::ReadMeasurement).await.is_err());

        conn.set_response(FRAME.to_vec());
        assert!(session.request(Command::ReadMeasurement).await.is_ok());
        assert_eq!(session.transitions()[0], Disconnected);
        assert_eq!(conn.disconnect_count(), 2);
    }
}
