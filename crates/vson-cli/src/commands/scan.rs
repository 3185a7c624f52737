//! Scan command implementation.

use std::io::{self, Write};
use std::time::Duration;

use anyhow::{Context, Result};
use vson_core::scan::{self, ScanOptions};

use crate::cli::OutputFormat;
use crate::format::format_scan;

pub async fn cmd_scan(timeout: u64, format: OutputFormat, quiet: bool) -> Result<()> {
    if !quiet && format == OutputFormat::Text {
        eprintln!("Scanning for {timeout}s...");
    }

    let options = ScanOptions::default().duration(Duration::from_secs(timeout));
    let advertisements = scan::scan_for_devices(options)
        .await
        .context("Failed to scan for devices")?;

    let mut stdout = io::stdout();
    stdout.write_all(format_scan(&advertisements, format)?.as_bytes())?;
    stdout.flush()?;
    Ok(())
}
