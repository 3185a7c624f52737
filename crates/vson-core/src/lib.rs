//! Core BLE library for Vson / WP6003 air quality sensors.
//!
//! This crate turns advertisements and command responses of WP6003-family
//! monitors into normalized [`SensorUpdate`](vson_types::SensorUpdate)s.
//!
//! # Features
//!
//! - **Advertisement decoding**: identity from the vendor service UUID
//! - **Command sessions**: connect, subscribe, write, await one notification, tear down
//! - **Per-device state**: pending identity, last good advertisement, poll gate
//! - **Update coordination**: passive and active updates merged into one snapshot
//! - **btleplug transport**: scanning and a [`GattConnection`] over real hardware
//!
//! # Supported Devices
//!
//! | Profile | Manufacturer | Active read |
//! |---------|--------------|-------------|
//! | `vson` | Vson Technology CO., LTD | 0xAB command, 18-byte frame: temperature, TVOC, HCHO, CO2 |
//! | `wp6003` | Vson | Liveness check only (connect, enumerate, disconnect) |
//!
//! Both share the `fff0` service, so the profile is chosen when a device is
//! registered rather than detected from its advertisement.
//!
//! # Platform Differences
//!
//! On macOS the reported address is all zeros and CoreBluetooth assigns a
//! UUID instead; [`create_identifier`] picks whichever one is usable.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use vson_core::{CoordinatorConfig, UpdateCoordinator, scan};
//! use vson_core::device::ConnectionConfig;
//! use vson_types::Profile;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let locator = scan::BleLocator::with_default_adapter(ConnectionConfig::default()).await?;
//!     let coordinator = Arc::new(UpdateCoordinator::new(locator, CoordinatorConfig::default()));
//!     coordinator.register("AA:BB:CC:DD:EE:FF", Profile::Vson).await?;
//!
//!     for adv in scan::scan_for_devices(scan::ScanOptions::default()).await? {
//!         coordinator.process_advertisement(&adv).await;
//!     }
//!
//!     let update = coordinator.poll_device("AA:BB:CC:DD:EE:FF").await?;
//!     println!("{update}");
//!     Ok(())
//! }
//! ```

pub mod advertisement;
pub mod commands;
pub mod coordinator;
pub mod device;
pub mod error;
pub mod events;
pub mod guard;
pub mod mock;
pub mod passive;
pub mod readings;
pub mod retry;
pub mod scan;
pub mod session;
pub mod state;
pub mod traits;
pub mod util;

// Re-export types and uuid modules from vson-types
pub use vson_types::types;
pub use vson_types::uuid as uuids;

// Core exports
pub use advertisement::{Advertisement, AdvertisementData, parse_advertisement};
pub use commands::{CALIBRATE, Command, READ_MEASUREMENT};
pub use coordinator::{CoordinatorConfig, UpdateCoordinator};
pub use device::{BleConnection, ConnectionConfig};
pub use error::{ConnectionFailureReason, Error, Result};
pub use events::{DeviceEvent, EventReceiver, EventSender, FailureKind, UpdateSource};
pub use mock::{MockCall, MockConnection, MockLocator};
pub use passive::{PassiveListener, PassiveOptions};
pub use retry::{RetryConfig, with_retry};
pub use scan::{BleLocator, ScanOptions};
pub use session::{CommandSession, SessionConfig, SessionState};
pub use state::{DeviceSession, DeviceSessionState, Observation, PollPolicy, poll_needed};
pub use traits::{DeviceLocator, GattConnection, GattTable, NotificationHandler};
pub use util::{create_identifier, format_peripheral_id};

// Re-export from vson-types
pub use vson_types::{
    DeviceIdentity, Measurement, MeasurementKind, MeasurementValue, Profile, SensorUpdate, Unit,
};
