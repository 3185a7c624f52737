//! Events published by the update coordinator.
//!
//! Listeners receive every identity change, merged update and failed poll
//! over a `tokio::sync::broadcast` channel.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use vson_types::{DeviceIdentity, SensorUpdate};

use crate::error::Error;

/// Where an update came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateSource {
    /// Passively observed advertisement.
    Advertisement,
    /// Active command exchange.
    Poll,
}

/// Category of a failed poll, so a scheduler can pick its retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum FailureKind {
    /// No connectable device right now.
    Unavailable,
    /// Device did not answer the command in time.
    Timeout,
    /// Vendor GATT table missing; cache cleared.
    StaleGatt,
    /// Poll skipped: identity unknown or another poll running.
    Skipped,
    /// Connection failure, stage timeout or unexpected transport failure.
    Transport,
}

impl FailureKind {
    /// Classify an error returned by a poll.
    #[must_use]
    pub fn of(error: &Error) -> Self {
        match error {
            Error::DeviceUnavailable { .. } => FailureKind::Unavailable,
            Error::ResponseTimeout { .. } => FailureKind::Timeout,
            e if e.is_stale_gatt() => FailureKind::StaleGatt,
            Error::IdentityUnknown { .. } | Error::PollInProgress { .. } => FailureKind::Skipped,
            _ => FailureKind::Transport,
        }
    }
}

/// Events emitted by the coordinator.
///
/// All events are serializable for logging and IPC.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new event types
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum DeviceEvent {
    /// First matching advertisement established the device identity.
    Identified {
        address: String,
        identity: DeviceIdentity,
    },
    /// Merged snapshot after a passive or active update.
    Update {
        address: String,
        source: UpdateSource,
        update: SensorUpdate,
    },
    /// An active poll failed.
    PollFailed {
        address: String,
        kind: FailureKind,
        error: String,
    },
    /// Device was removed from the coordinator.
    Removed { address: String },
}

impl DeviceEvent {
    /// Address of the device the event is about.
    #[must_use]
    pub fn address(&self) -> &str {
        match self {
            DeviceEvent::Identified { address, .. }
            | DeviceEvent::Update { address, .. }
            | DeviceEvent::PollFailed { address, .. }
            | DeviceEvent::Removed { address } => address,
        }
    }
}

/// Sender for device events.
pub type EventSender = broadcast::Sender<DeviceEvent>;

/// Receiver for device events.
pub type EventReceiver = broadcast::Receiver<DeviceEvent>;

/// Event dispatcher for sending events to multiple receivers.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    sender: EventSender,
}

impl EventDispatcher {
    /// Create a new event dispatcher.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Send an event.
    pub fn send(&self, event: DeviceEvent) {
        // No receivers is fine
        let _ = self.sender.send(event);
    }

    /// Get the number of active receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(100)
    }
}
