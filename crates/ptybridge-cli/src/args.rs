//! CLI argument parsing with clap derive macros.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use ptybridge_core::config::{RelayConfig, DEFAULT_CHUNK_SIZE};

const SESSION_HELP: &str = "Bridge session name [default: $PTYBRIDGE_SESSION or 'default']";

/// Virtual null-modem cable between two pseudo-terminals.
///
/// Allocates two PTYs and relays every byte written to one peer device to
/// the other, so two programs that expect a serial port can talk to each
/// other without hardware.
#[derive(Debug, Parser)]
#[command(name = "ptybridge", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run a bridge in the foreground, printing its ports on stdout
    #[command(after_help = "\
Examples:
  ptybridge run                         # Print two ports, relay until Ctrl+C
  ptybridge run --chunk-size 4096       # Move up to 4 KiB per read
  ptybridge run --ports-file ports.txt  # Also write the ports to a file")]
    Run(RunArgs),

    /// Start a bridge in the background and print its ports
    #[command(after_help = "\
Examples:
  ptybridge start                       # Detach; ports listed in the runtime dir
  ptybridge start -s gps                # A second, independent bridge
  ptybridge start --ports-file /tmp/pty_bridge_ports.txt")]
    Start(RelayArgs),

    /// Stop a background bridge
    Stop(SessionArgs),

    /// Print the ports of a background bridge
    Ports(PortsArgs),
}

/// Settings shared by foreground and background bridges.
#[derive(Debug, Clone, clap::Args)]
pub struct RelayArgs {
    #[arg(short, long, help = SESSION_HELP)]
    pub session: Option<String>,

    /// Maximum bytes moved per read (1-65536)
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE, value_parser = parse_chunk_size)]
    pub chunk_size: usize,

    /// Write the port listing to this file
    #[arg(long, value_name = "PATH")]
    pub ports_file: Option<PathBuf>,
}

#[derive(Debug, Clone, clap::Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub relay: RelayArgs,

    /// Run without a terminal: log to a file and announce ports only to the
    /// ports file (used by `start`)
    #[arg(long, hide = true)]
    pub detached: bool,
}

#[derive(Debug, clap::Args)]
pub struct SessionArgs {
    #[arg(short, long, help = SESSION_HELP)]
    pub session: Option<String>,
}

#[derive(Debug, clap::Args)]
pub struct PortsArgs {
    #[arg(short, long, help = SESSION_HELP)]
    pub session: Option<String>,

    /// Read the listing from this file instead of the session's default
    #[arg(long, value_name = "PATH")]
    pub ports_file: Option<PathBuf>,

    /// Print status as JSON
    #[arg(long)]
    pub json: bool,
}

impl RelayArgs {
    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            chunk_size: self.chunk_size,
        }
    }
}

fn parse_chunk_size(s: &str) -> Result<usize, String> {
    let size: usize = s
        .parse()
        .map_err(|_| format!("'{}' is not a number of bytes", s))?;
    RelayConfig::with_chunk_size(size)
        .map(|config| config.chunk_size)
        .map_err(|e| e.to_string())
}
