//! Add command implementation.

use anyhow::{Context, Result};
use vson_types::{Profile, short_identifier};

use crate::config::{Config, DeviceEntry};

pub fn cmd_add(address: &str, profile: Profile, alias: Option<String>, quiet: bool) -> Result<()> {
    let identifier =
        short_identifier(address).with_context(|| format!("Invalid device address '{address}'"))?;

    let mut config = Config::load();
    config.upsert_device(DeviceEntry {
        address: address.trim().to_ascii_uppercase(),
        profile,
        alias,
    });
    config.save()?;

    if !quiet {
        println!(
            "Registered {} as {} ({})",
            address,
            profile.descriptor().device_name(&identifier),
            Config::path().display()
        );
    }
    Ok(())
}
