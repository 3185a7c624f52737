//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};

use vson_types::Profile;

/// Output format for commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "vson")]
#[command(author, version, about = "CLI for Vson / WP6003 air quality sensors", long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Scan for nearby sensors
    Scan {
        /// Scan timeout in seconds
        #[arg(short, long, default_value = "10")]
        timeout: u64,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Read current values from a device
    Read {
        /// Device address, UUID or configured alias
        #[arg(short, long, env = "VSON_DEVICE")]
        device: String,

        /// Device profile (vson, wp6003); defaults to the configured one
        #[arg(short, long)]
        profile: Option<Profile>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Watch configured devices, printing every update
    Watch {
        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Register a device in the config file
    Add {
        /// Device address (MAC address or UUID)
        address: String,

        /// Device profile (vson, wp6003)
        #[arg(short, long, default_value = "vson")]
        profile: Profile,

        /// Friendly name for the device
        #[arg(short, long)]
        alias: Option<String>,
    },
}
