//! Watch command implementation.

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use vson_core::scan::BleLocator;
use vson_core::{ConnectionConfig, PassiveListener, UpdateCoordinator};

use crate::cli::OutputFormat;
use crate::config::Config;
use crate::format::format_event;

pub async fn cmd_watch(format: OutputFormat, quiet: bool, config: &Config) -> Result<()> {
    if config.devices.is_empty() {
        bail!(
            "No devices configured in {}. Add one with `vson add <ADDRESS>`",
            Config::path().display()
        );
    }

    let locator = BleLocator::with_default_adapter(ConnectionConfig::default())
        .await
        .context("No Bluetooth adapter available")?;
    let coordinator = Arc::new(UpdateCoordinator::new(locator, config.coordinator_config()));
    for entry in &config.devices {
        coordinator
            .register(&entry.address, entry.profile)
            .await
            .with_context(|| format!("Invalid device address '{}'", entry.address))?;
    }

    let mut events = coordinator.subscribe();
    let listener = Arc::new(PassiveListener::new(
        Arc::clone(&coordinator),
        config.passive_options(),
    ));
    let cancel = CancellationToken::new();
    let passive = listener.start(cancel.clone());
    let polling = coordinator.start(cancel.clone());

    if !quiet && format == OutputFormat::Text {
        eprintln!(
            "Watching {} device(s). Press Ctrl+C to stop.",
            config.devices.len()
        );
    }

    let mut stdout = io::stdout();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\nShutting down...");
                break;
            }
            event = events.recv() => match event {
                Ok(event) => {
                    stdout.write_all(format_event(&event, format)?.as_bytes())?;
                    stdout.flush()?;
                }
                Err(RecvError::Lagged(skipped)) => warn!("Dropped {} events", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    }

    cancel.cancel();
    let (passive, polling) = tokio::join!(passive, polling);
    passive.context("Passive listener panicked")?;
    polling.context("Polling loop panicked")?;
    Ok(())
}
