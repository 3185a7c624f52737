//! Read command implementation.

use std::io::{self, Write};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tracing::debug;
use vson_core::scan::{BleLocator, ScanOptions, scan_with_adapter};
use vson_core::{ConnectionConfig, UpdateCoordinator};
use vson_types::Profile;

use crate::cli::OutputFormat;
use crate::config::{Config, resolve_device};
use crate::format::format_update;

pub async fn cmd_read(
    device: &str,
    profile: Option<Profile>,
    format: OutputFormat,
    quiet: bool,
    config: &Config,
) -> Result<()> {
    let (address, profile) = resolve_device(device, profile, config);
    debug!(address = %address, profile = %profile, "Resolved device");

    let locator = BleLocator::with_default_adapter(ConnectionConfig::default())
        .await
        .context("No Bluetooth adapter available")?;
    let options =
        ScanOptions::default().duration(Duration::from_secs(config.scan_duration_secs.max(1)));
    let adapter = locator.adapter().clone();
    let coordinator = UpdateCoordinator::new(locator, config.coordinator_config());
    let session = coordinator
        .register(&address, profile)
        .await
        .with_context(|| format!("Invalid device address '{address}'"))?;

    if !quiet && format == OutputFormat::Text {
        eprintln!("Looking for {address}...");
    }
    // Identity comes from the advertisement; the device must be seen first.
    let advertisements = scan_with_adapter(&adapter, &options)
        .await
        .context("Failed to scan for devices")?;
    for adv in &advertisements {
        coordinator.process_advertisement(adv).await;
    }
    if session.is_pending().await {
        bail!("Device {address} not found while scanning");
    }

    let update = coordinator
        .poll_device(&address)
        .await
        .with_context(|| format!("Failed to read from {address}"))?;

    let mut stdout = io::stdout();
    stdout.write_all(format_update(&update, format)?.as_bytes())?;
    stdout.flush()?;
    Ok(())
}
