//! Command-line interface for sidmon
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// VLF signal monitor with clock-drift-corrected acquisition
#[derive(Parser, Debug)]
#[command(
    name = "sidmon",
    version,
    about = "VLF signal monitor with clock-drift-corrected acquisition"
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH", default_value = "sidmon.toml")]
    pub config: PathBuf,

    /// Suppress per-interval status lines
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose output (-v: debug, -vv: full trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Audio input device override (cpal device name, or a frequency in Hz
    /// for the sine backend)
    #[arg(long, value_name = "DEVICE")]
    pub device: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List available audio capture devices
    Devices,
}

impl Cli {
    /// Default log filter derived from the verbosity flags; `RUST_LOG`
    /// still overrides it.
    pub fn log_filter(&self) -> &'static str {
        if self.quiet {
            "warn"
        } else {
            match self.verbose {
                0 => "info",
                1 => "debug",
                _ => "trace",
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::parse_from(["sidmon"]);
        assert!(cli.command.is_none());
        assert_eq!(cli.config, PathBuf::from("sidmon.toml"));
        assert_eq!(cli.log_filter(), "info");
    }

    #[test]
    fn test_verbosity_levels() {
        assert_eq!(Cli::parse_from(["sidmon", "-v"]).log_filter(), "debug");
        assert_eq!(Cli::parse_from(["sidmon", "-vv"]).log_filter(), "trace");
        assert_eq!(Cli::parse_from(["sidmon", "-q"]).log_filter(), "warn");
    }

    #[test]
    fn test_devices_subcommand() {
        let cli = Cli::parse_from(["sidmon", "devices"]);
        assert!(matches!(cli.command, Some(Commands::Devices)));
    }

    #[test]
    fn test_device_override() {
        let cli = Cli::parse_from(["sidmon", "--device", "hw:1"]);
        assert_eq!(cli.device.as_deref(), Some("hw:1"));
    }
}
