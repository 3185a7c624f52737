//! Update coordinator.
//!
//! Holds one [`DeviceSession`] per registered address, feeds advertisements
//! into them, runs active polls through a [`DeviceLocator`] and republishes
//! merged snapshots as [`DeviceEvent`]s.
//!
//! `process_advertisement` and `poll_device` are independent entry points; a
//! host with its own timers can call them directly. [`UpdateCoordinator::start`]
//! is an optional loop that polls every device whose eligibility predicate
//! holds, using each profile's default schedule.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use vson_core::{Advertisement, CoordinatorConfig, MockConnection, MockLocator, UpdateCoordinator};
//! use vson_types::{Profile, uuids};
//!
//! # #[tokio::main]
//! # async fn main() -> vson_core::Result<()> {
//! let locator = MockLocator::new();
//! locator.insert(MockConnection::new("AA:BB:CC:DD:EE:FF"));
//! let coordinator = Arc::new(UpdateCoordinator::new(locator, CoordinatorConfig::default()));
//!
//! coordinator.register("AA:BB:CC:DD:EE:FF", Profile::Wp6003).await?;
//! let adv = Advertisement::new("AA:BB:CC:DD:EE:FF", [uuids::VENDOR_SERVICE], [])?;
//! assert!(coordinator.process_advertisement(&adv).await);
//! assert!(coordinator.needs_poll("AA:BB:CC:DD:EE:FF").await?);
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::RwLock;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use vson_types::{Profile, SensorUpdate, short_identifier};

use crate::advertisement::Advertisement;
use crate::error::{Error, Result};
use crate::events::{DeviceEvent, EventDispatcher, EventReceiver, FailureKind, UpdateSource};
use crate::session::SessionConfig;
use crate::state::{DEFAULT_MIN_POLL_AGE, DeviceSession, PollPolicy};
use crate::traits::DeviceLocator;
use crate::util::normalize_address;

/// Default period of the polling loop.
pub const DEFAULT_TICK: Duration = Duration::from_secs(30);

/// Configuration for the update coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Configuration of every command session.
    pub session: SessionConfig,
    /// Minimum poll age of advertisement-triggered profiles.
    pub min_poll_age: Duration,
    /// Period of the polling loop.
    pub tick: Duration,
    /// Capacity of the event channel.
    pub event_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            min_poll_age: DEFAULT_MIN_POLL_AGE,
            tick: DEFAULT_TICK,
            event_capacity: 100,
        }
    }
}

impl CoordinatorConfig {
    /// Set the session configuration.
    #[must_use]
    pub fn session(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    /// Set the minimum poll age of advertisement-triggered profiles.
    #[must_use]
    pub fn min_poll_age(mut self, age: Duration) -> Self {
        self.min_poll_age = age;
        self
    }

    /// Set the polling loop period.
    #[must_use]
    pub fn tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Set the event channel capacity.
    #[must_use]
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }
}

/// Coordinates passive and active updates for a set of devices.
pub struct UpdateCoordinator<L: DeviceLocator> {
    locator: L,
    config: CoordinatorConfig,
    devices: RwLock<HashMap<String, Arc<DeviceSession>>>,
    events: EventDispatcher,
}

impl<L: DeviceLocator> std::fmt::Debug for UpdateCoordinator<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateCoordinator")
            .field("config", &self.config)
            .field("receivers", &self.events.receiver_count())
            .finish()
    }
}

impl<L: DeviceLocator> UpdateCoordinator<L> {
    /// Create a coordinator with no devices.
    pub fn new(locator: L, config: CoordinatorConfig) -> Self {
        Self {
            events: EventDispatcher::new(config.event_capacity),
            locator,
            config,
            devices: RwLock::new(HashMap::new()),
        }
    }

    /// Subscribe to coordinator events.
    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    /// The locator used for active polls.
    pub fn locator(&self) -> &L {
        &self.locator
    }

    // --- Device lifecycle ---

    /// Register a device. Registering an address again returns the existing
    /// session unchanged.
    pub async fn register(&self, address: &str, profile: Profile) -> Result<Arc<DeviceSession>> {
        short_identifier(address)?;
        let key = normalize_address(address);
        let mut devices = self.devices.write().await;
        if let Some(existing) = devices.get(&key) {
            if existing.profile() != profile {
                warn!(
                    address = %key,
                    registered = %existing.profile(),
                    requested = %profile,
                    "Device already registered with another profile"
                );
            }
            return Ok(Arc::clone(existing));
        }

        let session = Arc::new(DeviceSession::new(
            &key,
            profile,
            self.config.session.clone(),
            PollPolicy::for_profile(profile, self.config.min_poll_age),
        ));
        info!(address = %key, profile = %profile, "Registered device");
        devices.insert(key, Arc::clone(&session));
        Ok(session)
    }

    /// Remove a device. Returns whether it was registered.
    pub async fn remove(&self, address: &str) -> bool {
        let key = normalize_address(address);
        let removed = self.devices.write().await.remove(&key).is_some();
        if removed {
            info!(address = %key, "Removed device");
            self.events.send(DeviceEvent::Removed { address: key });
        }
        removed
    }

    /// Session of a registered device.
    pub async fn session(&self, address: &str) -> Option<Arc<DeviceSession>> {
        self.devices
            .read()
            .await
            .get(&normalize_address(address))
            .cloned()
    }

    /// Addresses of all registered devices.
    pub async fn addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> = self.devices.read().await.keys().cloned().collect();
        addresses.sort();
        addresses
    }

    async fn require(&self, address: &str) -> Result<Arc<DeviceSession>> {
        self.session(address).await.ok_or_else(|| Error::UnknownDevice {
            address: normalize_address(address),
        })
    }

    // --- Passive path ---

    /// Feed one advertisement to its device.
    ///
    /// Returns whether the device state changed. Advertisements of
    /// unregistered devices are ignored.
    pub async fn process_advertisement(&self, adv: &Advertisement) -> bool {
        let Some(session) = self.session(adv.address()).await else {
            return false;
        };
        let observation = session.observe_detailed(adv).await;
        if !observation.updated {
            return false;
        }

        let Some(identity) = session.identity().await else {
            return false;
        };
        if observation.identified {
            self.events.send(DeviceEvent::Identified {
                address: session.address().to_string(),
                identity: identity.clone(),
            });
        }

        // Advertisements carry no readings; the passive update only refreshes
        // the snapshot's identity and timestamp.
        session.merge(SensorUpdate::new(identity)).await;
        if let Some(snapshot) = session.latest().await {
            self.events.send(DeviceEvent::Update {
                address: session.address().to_string(),
                source: UpdateSource::Advertisement,
                update: snapshot,
            });
        }
        true
    }

    // --- Active path ---

    /// Should the device be polled now?
    ///
    /// The locator is only asked for connectability once identity and poll
    /// age allow a poll.
    pub async fn needs_poll(&self, address: &str) -> Result<bool> {
        let session = self.require(address).await?;
        if !session.needs_poll(true).await {
            return Ok(false);
        }
        let connectable = self.locator.is_connectable(session.address()).await;
        Ok(session.needs_poll(connectable).await)
    }

    /// Run one active read of the device and publish the merged snapshot.
    ///
    /// Fails with [`Error::DeviceUnavailable`] when the locator has no
    /// connectable handle. Every failure is also published as
    /// [`DeviceEvent::PollFailed`].
    pub async fn poll_device(&self, address: &str) -> Result<SensorUpdate> {
        let session = self.require(address).await?;
        let result = match self.locator.find_connectable(session.address()).await {
            Some(connection) => session.poll(connection).await,
            None => Err(Error::device_unavailable(session.address())),
        };

        match result {
            Ok(update) => {
                session.merge(update.clone()).await;
                let snapshot = session.latest().await.unwrap_or_else(|| update.clone());
                self.events.send(DeviceEvent::Update {
                    address: session.address().to_string(),
                    source: UpdateSource::Poll,
                    update: snapshot,
                });
                Ok(update)
            }
            Err(e) => {
                let kind = FailureKind::of(&e);
                match kind {
                    FailureKind::Unavailable | FailureKind::Skipped => {
                        debug!(address = %session.address(), "Poll skipped: {}", e)
                    }
                    _ => warn!(address = %session.address(), "Poll failed: {}", e),
                }
                self.events.send(DeviceEvent::PollFailed {
                    address: session.address().to_string(),
                    kind,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Poll every device that is due, concurrently across devices.
    pub async fn poll_due(&self) -> Vec<(String, Result<SensorUpdate>)> {
        let mut due = Vec::new();
        for address in self.addresses().await {
            if matches!(self.needs_poll(&address).await, Ok(true)) {
                due.push(address);
            }
        }
        if !due.is_empty() {
            debug!(count = due.len(), "Polling due devices");
        }
        let results = join_all(due.iter().map(|address| self.poll_device(address))).await;
        due.into_iter().zip(results).collect()
    }
}

impl<L: DeviceLocator + 'static> UpdateCoordinator<L> {
    /// Start the polling loop.
    ///
    /// Every tick, each device whose eligibility predicate holds is polled.
    /// The loop stops when `cancel_token` is cancelled.
    pub fn start(self: &Arc<Self>, cancel_token: CancellationToken) -> tokio::task::JoinHandle<()> {
        let coordinator = Arc::clone(self);

        tokio::spawn(async move {
            info!("Starting update coordinator");
            let mut ticker = interval(coordinator.config.tick);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel_token.cancelled() => {
                        info!("Update coordinator cancelled");
                        break;
                    }
                    _ = ticker.tick() => {
                        coordinator.poll_due().await;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockConnection, MockLocator};
    use crate::retry::RetryConfig;
    use vson_types::uuids::VENDOR_SERVICE;
    use vson_types::{MeasurementKind, MeasurementValue};

    const ADDRESS: &str = "AA:BB:CC:DD:EE:FF";
    const FRAME: [u8; 18] = [
        0x0a, 0x00, 0x01, 0x01, 0x0e, 0x02, 0x01, 0x09, 0x08, 0x00, 0x00, 0x65, 0x00, 0x0f, 0x01,
        0x00, 0x02, 0x51,
    ];

    fn config() -> CoordinatorConfig {
        CoordinatorConfig::default()
            .session(SessionConfig::default().connect_retry(RetryConfig::none()))
    }

    fn vendor_adv() -> Advertisement {
        Advertisement::new(ADDRESS, [VENDOR_SERVICE], []).unwrap()
    }

    #[tokio::test]
    async fn test_register_is_idempotent_and_validates() {
        let coordinator = UpdateCoordinator::new(MockLocator::new(), config());
        let a = coordinator.register(ADDRESS, Profile::Vson).await.unwrap();
        let b = coordinator.register("aa:bb:cc:dd:ee:ff", Profile::Vson).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(coordinator.addresses().await, vec![ADDRESS.to_string()]);

        assert!(matches!(
            coordinator.register("nope", Profile::Vson).await,
            Err(Error::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_process_advertisement_publishes_identity_once() {
        let coordinator = UpdateCoordinator::new(MockLocator::new(), config());
        coordinator.register(ADDRESS, Profile::Vson).await.unwrap();
        let mut rx = coordinator.subscribe();

        assert!(coordinator.process_advertisement(&vendor_adv()).await);
        assert!(!coordinator.process_advertisement(&vendor_adv()).await);

        match rx.recv().await.unwrap() {
            DeviceEvent::Identified { identity, .. } => {
                assert_eq!(identity.name(), "WP6003 CCDDEEFF")
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(matches!(
            rx.recv().await.unwrap(),
            DeviceEvent::Update {
                source: UpdateSource::Advertisement,
                ..
            }
        ));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unregistered_advertisement_ignored() {
        let coordinator = UpdateCoordinator::new(MockLocator::new(), config());
        assert!(!coordinator.process_advertisement(&vendor_adv()).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_device_publishes_merged_update() {
        let locator = MockLocator::new();
        locator.insert(MockConnection::new(ADDRESS).with_response(FRAME.to_vec()));
        let coordinator = UpdateCoordinator::new(locator, config());
        coordinator.register(ADDRESS, Profile::Vson).await.unwrap();
        coordinator.process_advertisement(&vendor_adv()).await;
        let mut rx = coordinator.subscribe();

        let update = coordinator.poll_device(ADDRESS).await.unwrap();
        assert_eq!(update.len(), 4);

        match rx.recv().await.unwrap() {
            DeviceEvent::Update { source, update, .. } => {
                assert_eq!(source, UpdateSource::Poll);
                assert_eq!(
                    update.get(MeasurementKind::Co2).unwrap().value(),
                    MeasurementValue::Integer(593)
                );
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_poll_unavailable_device() {
        let coordinator = UpdateCoordinator::new(MockLocator::new(), config());
        coordinator.register(ADDRESS, Profile::Vson).await.unwrap();
        coordinator.process_advertisement(&vendor_adv()).await;
        let mut rx = coordinator.subscribe();

        let err = coordinator.poll_device(ADDRESS).await.unwrap_err();

        assert!(matches!(err, Error::DeviceUnavailable { .. }));
        assert!(matches!(
            rx.recv().await.unwrap(),
            DeviceEvent::PollFailed {
                kind: FailureKind::Unavailable,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_poll_unknown_device() {
        let coordinator = UpdateCoordinator::new(MockLocator::new(), config());
        assert!(matches!(
            coordinator.poll_device(ADDRESS).await,
            Err(Error::UnknownDevice { .. })
        ));
        assert!(coordinator.needs_poll(ADDRESS).await.is_err());
    }

    #[tokio::test]
    async fn test_needs_poll_checks_locator_last() {
        let locator = MockLocator::new();
        let coordinator = UpdateCoordinator::new(locator.clone(), config());
        coordinator.register(ADDRESS, Profile::Wp6003).await.unwrap();

        // Pending: locator not consulted.
        assert!(!coordinator.needs_poll(ADDRESS).await.unwrap());
        assert_eq!(locator.lookup_count(), 0);

        coordinator.process_advertisement(&vendor_adv()).await;
        assert!(!coordinator.needs_poll(ADDRESS).await.unwrap());

        locator.insert(MockConnection::new(ADDRESS));
        assert!(coordinator.needs_poll(ADDRESS).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_due_respects_schedule() {
        let locator = MockLocator::new();
        locator.insert(MockConnection::new(ADDRESS).with_response(FRAME.to_vec()));
        let coordinator = UpdateCoordinator::new(locator, config());
        coordinator.register(ADDRESS, Profile::Vson).await.unwrap();
        coordinator.process_advertisement(&vendor_adv()).await;

        assert_eq!(coordinator.poll_due().await.len(), 1);
        assert!(coordinator.poll_due().await.is_empty());

        tokio::time::advance(vson_types::VSON_POLL_INTERVAL).await;
        assert_eq!(coordinator.poll_due().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_polls_until_cancelled() {
        let locator = MockLocator::new();
        let conn = MockConnection::new(ADDRESS).with_response(FRAME.to_vec());
        locator.insert(conn.clone());
        let coordinator = Arc::new(UpdateCoordinator::new(locator, config()));
        coordinator.register(ADDRESS, Profile::Vson).await.unwrap();
        coordinator.process_advertisement(&vendor_adv()).await;
        let mut rx = coordinator.subscribe();

        let cancel = CancellationToken::new();
        let handle = coordinator.start(cancel.clone());

        let event = rx.recv().await.unwrap();
        assert!(matches!(
            event,
            DeviceEvent::Update {
                source: UpdateSource::Poll,
                ..
            }
        ));

        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(conn.disconnect_count(), 1);
    }

    #[tokio::test]
    async fn test_remove_publishes_event() {
        let coordinator = UpdateCoordinator::new(MockLocator::new(), config());
        coordinator.register(ADDRESS, Profile::Vson).await.unwrap();
        let mut rx = coordinator.subscribe();

        assert!(coordinator.remove(ADDRESS).await);
        assert!(!coordinator.remove(ADDRESS).await);
        assert!(coordinator.session(ADDRESS).await.is_none());
        assert!(matches!(
            rx.recv().await.unwrap(),
            DeviceEvent::Removed { .. }
        ));
    }
}
