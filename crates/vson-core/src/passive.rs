//! Passive listening via BLE advertisements.
//!
//! [`PassiveListener`] repeatedly scans for advertisers carrying the vendor
//! service and feeds every record to an [`UpdateCoordinator`]. It never
//! connects; connections only happen through the coordinator's active polls.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use vson_core::passive::{PassiveListener, PassiveOptions};
//! use tokio_util::sync::CancellationToken;
//!
//! let listener = PassiveListener::new(Arc::clone(&coordinator), PassiveOptions::default());
//! let cancel = CancellationToken::new();
//! let handle = listener.start(cancel.clone());
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::advertisement::Advertisement;
use crate::coordinator::UpdateCoordinator;
use crate::error::Result;
use crate::scan::{ScanOptions, scan_for_devices};
use crate::traits::DeviceLocator;

/// Options for the passive listener.
#[derive(Debug, Clone)]
pub struct PassiveOptions {
    /// Duration of each scan.
    pub scan_duration: Duration,
    /// Pause between scans.
    pub scan_interval: Duration,
}

impl Default for PassiveOptions {
    fn default() -> Self {
        Self {
            scan_duration: Duration::from_secs(5),
            scan_interval: Duration::from_secs(1),
        }
    }
}

impl PassiveOptions {
    /// Set the scan duration.
    #[must_use]
    pub fn scan_duration(mut self, duration: Duration) -> Self {
        self.scan_duration = duration;
        self
    }

    /// Set the pause between scans.
    #[must_use]
    pub fn scan_interval(mut self, interval: Duration) -> Self {
        self.scan_interval = interval;
        self
    }
}

/// Feeds scanned advertisements into a coordinator.
pub struct PassiveListener<L: DeviceLocator> {
    coordinator: Arc<UpdateCoordinator<L>>,
    options: PassiveOptions,
}

impl<L: DeviceLocator> std::fmt::Debug for PassiveListener<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PassiveListener")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<L: DeviceLocator> PassiveListener<L> {
    /// Create a listener for `coordinator`.
    pub fn new(coordinator: Arc<UpdateCoordinator<L>>, options: PassiveOptions) -> Self {
        Self {
            coordinator,
            options,
        }
    }

    /// Listener options.
    pub fn options(&self) -> &PassiveOptions {
        &self.options
    }

    /// Feed a batch of advertisements. Returns how many changed device state.
    pub async fn feed(&self, advertisements: &[Advertisement]) -> usize {
        let mut changed = 0;
        for adv in advertisements {
            if self.coordinator.process_advertisement(adv).await {
                changed += 1;
            }
        }
        changed
    }

    async fn scan_cycle(&self) -> Result<usize> {
        let options = ScanOptions::default().duration(self.options.scan_duration);
        let advertisements = scan_for_devices(options).await?;
        let changed = self.feed(&advertisements).await;
        debug!(seen = advertisements.len(), changed, "Passive scan cycle complete");
        Ok(changed)
    }
}

impl<L: DeviceLocator + 'static> PassiveListener<L> {
    /// Start listening.
    ///
    /// Spawns a task that scans until `cancel_token` is cancelled.
    pub fn start(self: &Arc<Self>, cancel_token: CancellationToken) -> tokio::task::JoinHandle<()> {
        let listener = Arc::clone(self);

        tokio::spawn(async move {
            info!("Starting passive listener");

            loop {
                tokio::select! {
                    _ = cancel_token.cancelled() => {
                        info!("Passive listener cancelled");
                        break;
                    }
                    result = listener.scan_cycle() => {
                        if let Err(e) = result {
                            warn!("Passive scan error: {}", e);
                        }
                        sleep(listener.options.scan_interval).await;
                    }
                }
            }
        })
    }
}
