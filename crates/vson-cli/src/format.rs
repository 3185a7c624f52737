//! Output formatting for updates, scan results and events.

use anyhow::{Context, Result};
use serde_json::json;
use time::format_description::well_known::Rfc3339;

use vson_core::{Advertisement, DeviceEvent};
use vson_types::SensorUpdate;

use crate::cli::OutputFormat;

fn timestamp(update: &SensorUpdate) -> String {
    update
        .captured_at()
        .format(&Rfc3339)
        .unwrap_or_else(|_| update.captured_at().to_string())
}

/// Render an update as indented text.
pub fn format_update_text(update: &SensorUpdate) -> String {
    let mut out = format!("{}\n", update.identity());
    out.push_str(&format!("  Captured: {}\n", timestamp(update)));
    if update.is_empty() {
        out.push_str("  (no measurements)\n");
    }
    for m in update.measurements() {
        out.push_str(&format!("  {m}\n"));
    }
    out
}

/// Render an update as pretty JSON.
pub fn format_update_json(update: &SensorUpdate) -> Result<String> {
    let mut out =
        serde_json::to_string_pretty(update).context("Failed to serialize update to JSON")?;
    out.push('\n');
    Ok(out)
}

/// Render an update in the requested format.
pub fn format_update(update: &SensorUpdate, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Text => Ok(format_update_text(update)),
        OutputFormat::Json => format_update_json(update),
    }
}

/// Render scan results as an aligned table.
pub fn format_scan_text(advertisements: &[Advertisement]) -> String {
    if advertisements.is_empty() {
        return "No devices found.\n".to_string();
    }
    let mut out = format!("{:<20} {:<16} {:>6}\n", "ADDRESS", "NAME", "RSSI");
    for adv in advertisements {
        out.push_str(&format!(
            "{:<20} {:<16} {:>6}\n",
            adv.address(),
            adv.local_name().unwrap_or("-"),
            adv.rssi().map_or_else(|| "-".to_string(), |r| r.to_string())
        ));
    }
    out.push_str(&format!("\nFound {} device(s)\n", advertisements.len()));
    out
}

/// Render scan results as a JSON array.
pub fn format_scan_json(advertisements: &[Advertisement]) -> Result<String> {
    let list: Vec<_> = advertisements
        .iter()
        .map(|adv| {
            json!({
                "address": adv.address(),
                "name": adv.local_name(),
                "rssi": adv.rssi(),
                "services": adv.service_uuids().iter().map(|u| u.to_string()).collect::<Vec<_>>(),
            })
        })
        .collect();
    let mut out = serde_json::to_string_pretty(&list).context("Failed to serialize scan results")?;
    out.push('\n');
    Ok(out)
}

/// Render scan results in the requested format.
pub fn format_scan(advertisements: &[Advertisement], format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Text => Ok(format_scan_text(advertisements)),
        OutputFormat::Json => format_scan_json(advertisements),
    }
}

/// Render one coordinator event. JSON events are one line each.
pub fn format_event(event: &DeviceEvent, format: OutputFormat) -> Result<String> {
    if format == OutputFormat::Json {
        let mut out = serde_json::to_string(event).context("Failed to serialize event")?;
        out.push('\n');
        return Ok(out);
    }
    Ok(match event {
        DeviceEvent::Identified { identity, .. } => format!("Identified {identity}\n"),
        DeviceEvent::Update { source, update, .. } => {
            format!("[{source:?}] {}", format_update_text(update))
        }
        DeviceEvent::PollFailed {
            address,
            kind,
            error,
        } => format!("Poll of {address} failed ({kind:?}): {error}\n"),
        DeviceEvent::Removed { address } => format!("Removed {address}\n"),
        other => format!("{other:?}\n"),
    })
}
