//! Hardware integration tests for vson-core
//!
//! These tests require actual BLE hardware and should be run with:
//! ```text
//! cargo test --package vson-core --test hardware_tests -- --ignored --nocapture
//! ```
//!
//! Configure the device via environment variables:
//! - `VSON_DEVICE`: device address (MAC on Linux/Windows, UUID on macOS)
//! - `VSON_PROFILE`: `vson` (default) or `wp6003`
//!
//! Example:
//! ```text
//! VSON_DEVICE="AA:BB:CC:DD:EE:FF" cargo test --package vson-core --test hardware_tests -- --ignored --nocapture
//! ```

use std::env;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use vson_core::scan::{BleLocator, ScanOptions, scan_for_devices};
use vson_core::{
    CommandSession, ConnectionConfig, CoordinatorConfig, DeviceLocator, SessionConfig,
    UpdateCoordinator,
};
use vson_types::Profile;

/// Default timeout for BLE operations
const BLE_TIMEOUT: Duration = Duration::from_secs(30);

fn get_device() -> Option<String> {
    env::var("VSON_DEVICE").ok().filter(|s| !s.is_empty())
}

fn get_profile() -> Profile {
    env::var("VSON_PROFILE")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(Profile::Vson)
}

#[tokio::test]
#[ignore = "requires BLE hardware"]
async fn test_scan_finds_vendor_advertisers() {
    let options = ScanOptions::default().duration(Duration::from_secs(10));

    match timeout(BLE_TIMEOUT, scan_for_devices(options)).await {
        Ok(Ok(advertisements)) => {
            println!("Scan found {} advertiser(s):", advertisements.len());
            for adv in &advertisements {
                println!(
                    "  - {} ({})",
                    adv.local_name().unwrap_or("Unknown"),
                    adv.address()
                );
                assert!(adv.has_vendor_service());
            }
        }
        Ok(Err(e)) => panic!("Scan failed: {}", e),
        Err(_) => panic!("Scan timed out"),
    }
}

#[tokio::test]
#[ignore = "requires BLE hardware"]
async fn test_verify_gatt_table() {
    let Some(address) = get_device() else {
        println!("VSON_DEVICE not set, skipping");
        return;
    };

    let locator = BleLocator::with_default_adapter(ConnectionConfig::default())
        .await
        .expect("no adapter");
    // The adapter only knows peripherals it has seen in a scan.
    let _ = scan_for_devices(ScanOptions::default()).await;
    let connection = locator
        .find_connectable(&address)
        .await
        .expect("device not in range");

    let mut session = CommandSession::new(connection, SessionConfig::default());
    let table = timeout(BLE_TIMEOUT, session.verify())
        .await
        .expect("verify timed out")
        .expect("verify failed");
    println!("Services: {}", table.service_count());
}

#[tokio::test]
#[ignore = "requires BLE hardware"]
async fn test_poll_device() {
    let Some(address) = get_device() else {
        println!("VSON_DEVICE not set, skipping");
        return;
    };

    let locator = BleLocator::with_default_adapter(ConnectionConfig::default())
        .await
        .expect("no adapter");
    let coordinator = Arc::new(UpdateCoordinator::new(locator, CoordinatorConfig::default()));
    coordinator
        .register(&address, get_profile())
        .await
        .expect("invalid address");

    let advertisements = scan_for_devices(ScanOptions::default())
        .await
        .expect("scan failed");
    for adv in &advertisements {
        coordinator.process_advertisement(adv).await;
    }

    let update = timeout(BLE_TIMEOUT, coordinator.poll_device(&address))
        .await
        .expect("poll timed out")
        .expect("poll failed");
    println!("{update}");
}
