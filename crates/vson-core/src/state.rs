//! Per-device session state.
//!
//! [`DeviceSessionState`] is the plain record: identity (pending until the
//! first matching advertisement), the last advertisement with a usable
//! payload, and the time of the last successful poll. [`DeviceSession`] wraps
//! it for concurrent use and is the single gate through which passive and
//! active updates flow.
//!
//! # Concurrency
//!
//! `observe` may run at any time, including while a poll is outstanding. The
//! state lock is held only for short synchronous sections and never across a
//! transport call, so observation never waits on a poll. Polls of one device
//! are serialized by the host; a concurrent poll is rejected with
//! [`Error::PollInProgress`] rather than queued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use vson_types::{DeviceIdentity, MeasurementKey, PollSchedule, PollStrategy, Profile, SensorUpdate};

use crate::advertisement::{Advertisement, parse_advertisement};
use crate::commands::Command;
use crate::error::{Error, Result};
use crate::guard::PollGuard;
use crate::readings::{decode_response, liveness_update};
use crate::session::{CommandSession, SessionConfig};
use crate::traits::GattConnection;
use crate::util::{normalize_address, same_address};

/// Default minimum time between successful polls.
pub const DEFAULT_MIN_POLL_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Poll eligibility policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Minimum time since the last successful poll.
    pub min_poll_age: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            min_poll_age: DEFAULT_MIN_POLL_AGE,
        }
    }
}

impl PollPolicy {
    /// Policy with the given minimum poll age.
    pub fn new(min_poll_age: Duration) -> Self {
        Self { min_poll_age }
    }

    /// Policy for a profile's default schedule.
    ///
    /// Fixed-interval profiles use their interval; advertisement-triggered
    /// profiles use `advertisement_gate`.
    pub fn for_profile(profile: Profile, advertisement_gate: Duration) -> Self {
        match profile.descriptor().schedule {
            PollSchedule::Interval(interval) => Self::new(interval),
            PollSchedule::OnAdvertisement => Self::new(advertisement_gate),
        }
    }
}

/// Should a device be polled now?
///
/// Never while the identity is unknown, never without a connectable path,
/// and only once `min_poll_age` has elapsed since the last successful poll
/// (a device that was never polled is due).
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use vson_core::{PollPolicy, poll_needed};
///
/// let policy = PollPolicy::default();
/// assert!(poll_needed(false, None, &policy, true));
/// assert!(!poll_needed(true, None, &policy, true));
/// assert!(!poll_needed(false, Some(Duration::from_secs(60)), &policy, true));
/// assert!(!poll_needed(false, None, &policy, false));
/// ```
pub fn poll_needed(
    pending: bool,
    since_last_poll: Option<Duration>,
    policy: &PollPolicy,
    connectable: bool,
) -> bool {
    if pending || !connectable {
        return false;
    }
    match since_last_poll {
        None => true,
        Some(elapsed) => elapsed >= policy.min_poll_age,
    }
}

/// Mutable record for one physical device.
#[derive(Debug, Clone)]
pub struct DeviceSessionState {
    profile: Profile,
    address: String,
    identity: Option<DeviceIdentity>,
    last_good_advertisement: Option<Advertisement>,
    last_poll: Option<Instant>,
}

impl DeviceSessionState {
    /// Fresh, pending state for `address`.
    pub fn new(address: &str, profile: Profile) -> Self {
        Self {
            profile,
            address: normalize_address(address),
            identity: None,
            last_good_advertisement: None,
            last_poll: None,
        }
    }

    /// Fold an advertisement into the state.
    ///
    /// Returns whether identity or payload state changed. Repeating the same
    /// advertisement returns `false`. Advertisements for other addresses or
    /// without the vendor service are ignored. Once identified, the state
    /// never returns to pending.
    pub fn observe(&mut self, adv: &Advertisement) -> bool {
        if !same_address(adv.address(), &self.address) {
            return false;
        }
        let Some(data) = parse_advertisement(self.profile, adv) else {
            return false;
        };

        let mut updated = false;
        if self.identity.is_none() {
            info!(address = %self.address, identity = %data.identity, "Device identified");
            self.identity = Some(data.identity);
            updated = true;
        }

        let same = self
            .last_good_advertisement
            .as_ref()
            .is_some_and(|last| last.same_payload(adv));
        if !same {
            updated = true;
        }
        self.last_good_advertisement = Some(adv.clone());
        updated
    }

    /// True until the first matching advertisement.
    pub fn is_pending(&self) -> bool {
        self.identity.is_none()
    }

    /// Device profile.
    pub fn profile(&self) -> Profile {
        self.profile
    }

    /// Normalized address.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Identity, once known.
    pub fn identity(&self) -> Option<&DeviceIdentity> {
        self.identity.as_ref()
    }

    /// Most recent matching advertisement.
    pub fn last_good_advertisement(&self) -> Option<&Advertisement> {
        self.last_good_advertisement.as_ref()
    }

    /// Time since the last successful poll.
    pub fn since_last_poll(&self) -> Option<Duration> {
        self.last_poll.map(|at| at.elapsed())
    }

    /// Record a successful poll.
    pub fn mark_polled(&mut self) {
        self.last_poll = Some(Instant::now());
    }

    /// Apply the eligibility predicate to this state.
    pub fn poll_needed(&self, policy: &PollPolicy, connectable: bool) -> bool {
        poll_needed(self.is_pending(), self.since_last_poll(), policy, connectable)
    }
}

/// Result of observing one advertisement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Observation {
    /// Identity or payload state changed.
    pub updated: bool,
    /// This advertisement established the identity.
    pub identified: bool,
}

/// Concurrent gate for one device.
#[derive(Debug)]
pub struct DeviceSession {
    address: String,
    profile: Profile,
    config: SessionConfig,
    policy: PollPolicy,
    state: RwLock<DeviceSessionState>,
    latest: RwLock<Option<SensorUpdate>>,
    polling: AtomicBool,
}

impl DeviceSession {
    /// Create a pending session for `address`.
    pub fn new(address: &str, profile: Profile, config: SessionConfig, policy: PollPolicy) -> Self {
        let state = DeviceSessionState::new(address, profile);
        Self {
            address: state.address().to_string(),
            profile,
            config,
            policy,
            state: RwLock::new(state),
            latest: RwLock::new(None),
            polling: AtomicBool::new(false),
        }
    }

    /// Normalized address.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Device profile.
    pub fn profile(&self) -> Profile {
        self.profile
    }

    /// Poll eligibility policy.
    pub fn policy(&self) -> &PollPolicy {
        &self.policy
    }

    /// Fold an advertisement into the state. See [`DeviceSessionState::observe`].
    pub async fn observe(&self, adv: &Advertisement) -> bool {
        self.observe_detailed(adv).await.updated
    }

    /// Like [`observe`](Self::observe), also telling whether this call
    /// established the identity.
    pub async fn observe_detailed(&self, adv: &Advertisement) -> Observation {
        let mut state = self.state.write().await;
        let was_pending = state.is_pending();
        let updated = state.observe(adv);
        Observation {
            updated,
            identified: was_pending && !state.is_pending(),
        }
    }

    /// True until the first matching advertisement.
    pub async fn is_pending(&self) -> bool {
        self.state.read().await.is_pending()
    }

    /// Identity, once known.
    pub async fn identity(&self) -> Option<DeviceIdentity> {
        self.state.read().await.identity().cloned()
    }

    /// Snapshot of the state record.
    pub async fn snapshot(&self) -> DeviceSessionState {
        self.state.read().await.clone()
    }

    /// Whether a poll is running.
    pub fn is_polling(&self) -> bool {
        self.polling.load(Ordering::Acquire)
    }

    /// Should the device be polled now, given whether it is connectable?
    pub async fn needs_poll(&self, connectable: bool) -> bool {
        !self.is_polling() && self.state.read().await.poll_needed(&self.policy, connectable)
    }

    /// Run one active read over `connection`.
    ///
    /// Always yields an update on success, possibly without measurements
    /// (liveness check, malformed frame). Unexpected transport failures are
    /// logged and returned as [`Error::PollFailed`].
    #[tracing::instrument(level = "debug", skip(self, connection), fields(address = %self.address, profile = %self.profile))]
    pub async fn poll<C: GattConnection>(&self, connection: C) -> Result<SensorUpdate> {
        let _guard = PollGuard::try_acquire(&self.polling).ok_or_else(|| Error::PollInProgress {
            address: self.address.clone(),
        })?;
        let identity = self
            .identity()
            .await
            .ok_or_else(|| Error::IdentityUnknown {
                address: self.address.clone(),
            })?;

        let mut session = CommandSession::new(connection, self.config.clone());
        let outcome = match identity.profile().descriptor().poll_strategy {
            PollStrategy::ReadFrame(_) => session
                .request(Command::ReadMeasurement)
                .await
                .map(|frame| decode_response(&identity, &frame)),
            PollStrategy::Liveness => session.verify().await.map(|_| liveness_update(&identity)),
        };

        match outcome {
            Ok(update) => {
                self.state.write().await.mark_polled();
                debug!(measurements = update.len(), "Poll complete");
                Ok(update)
            }
            Err(e) if e.is_unexpected_transport() => {
                warn!(address = %self.address, profile = %self.profile, error = ?e, "Unexpected transport failure during poll");
                Err(Error::PollFailed {
                    address: self.address.clone(),
                    message: e.to_string(),
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Merge an update into the latest snapshot, last write wins per key.
    ///
    /// Returns the keys whose value was replaced.
    pub async fn merge(&self, update: SensorUpdate) -> Vec<MeasurementKey> {
        let mut latest = self.latest.write().await;
        match latest.as_mut() {
            Some(current) => current.merge(update),
            None => {
                *latest = Some(update);
                Vec::new()
            }
        }
    }

    /// Latest merged snapshot.
    pub async fn latest(&self) -> Option<SensorUpdate> {
        self.latest.read().await.clone()
    }
}
