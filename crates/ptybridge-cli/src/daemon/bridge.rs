//! A running bridge: two PTY pairs, their announcement, and the relay.

use std::future::Future;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use ptybridge_core::config::RelayConfig;
use ptybridge_core::ports::PortListing;
use tracing::{info, warn};

use crate::daemon::announce::Announcement;
use crate::daemon::pty::PtyPair;
use crate::daemon::relay::Relay;
use crate::error::BridgeError;

/// Startup settings for a bridge.
#[derive(Debug, Clone)]
pub struct BridgeOptions {
    pub relay: RelayConfig,
    pub announcement: Announcement,
    /// PID file guarding against a second bridge for the same session.
    pub pid_path: Option<PathBuf>,
}

/// Owns both PTY pairs for the lifetime of the process.
///
/// Dropping the bridge closes both pairs and removes the files it wrote.
pub struct Bridge {
    pair_a: PtyPair,
    pair_b: PtyPair,
    listing: PortListing,
    options: BridgeOptions,
}

impl Bridge {
    /// Allocate both pairs and announce their peer devices.
    ///
    /// The PID file is written before the port listing, so anything that
    /// sees the listing can also find the process to stop.
    pub fn open(options: BridgeOptions) -> Result<Self> {
        options.relay.validate().map_err(BridgeError::from)?;

        if let Some(pid_path) = &options.pid_path {
            if is_bridge_alive(pid_path) {
                anyhow::bail!("Bridge already running (PID file {:?} is live)", pid_path);
            }
        }

        let pair_a = PtyPair::allocate()?;
        let pair_b = PtyPair::allocate()?;
        let listing = PortListing::new(pair_a.peer_path(), pair_b.peer_path());

        let bridge = Self {
            pair_a,
            pair_b,
            listing,
            options,
        };

        if let Some(pid_path) = &bridge.options.pid_path {
            std::fs::write(pid_path, std::process::id().to_string())
                .with_context(|| format!("Failed to write PID file: {:?}", pid_path))?;
        }

        bridge.options.announcement.announce(&bridge.listing)?;
        Ok(bridge)
    }

    pub fn listing(&self) -> &PortListing {
        &self.listing
    }

    /// Relay between the two pairs until `shutdown` completes or a transfer
    /// fails.
    pub async fn run_until<F: Future>(&self, shutdown: F) -> Result<F::Output, BridgeError> {
        let relay = Relay::new(
            self.pair_a.controller()?,
            self.pair_b.controller()?,
            self.options.relay,
        )?;
        info!(
            "Bridging {} <-> {}",
            self.listing.port_a.display(),
            self.listing.port_b.display()
        );
        relay.run_until(shutdown).await
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        // PID file last: `stop` takes its removal to mean the bridge is gone.
        self.options.announcement.retract();
        if let Some(pid_path) = &self.options.pid_path {
            if pid_path.exists() && std::fs::remove_file(pid_path).is_err() {
                warn!("Failed to remove PID file on shutdown");
            }
        }
    }
}

/// Read the PID stored in a PID file.
pub fn read_pid(pid_path: &Path) -> Option<i32> {
    std::fs::read_to_string(pid_path).ok()?.trim().parse().ok()
}

/// Check if a bridge process is still alive by reading its PID file.
///
/// Returns true if the PID file holds a valid PID and that process is still
/// running (verified via kill(pid, 0)).
pub fn is_bridge_alive(pid_path: &Path) -> bool {
    match read_pid(pid_path) {
        Some(pid) => is_process_alive(pid),
        None => false,
    }
}

pub(crate) fn is_process_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    // SAFETY: kill with signal 0 only checks whether the process exists and
    // may be signalled. No signal is delivered.
    if unsafe { libc::kill(pid, 0) } != 0 {
        return false;
    }
    !is_zombie(pid)
}

/// An exited process nobody has reaped yet still answers `kill(pid, 0)`.
#[cfg(target_os = "linux")]
fn is_zombie(pid: i32) -> bool {
    let Ok(stat) = std::fs::read_to_string(format!("/proc/{}/stat", pid)) else {
        return false;
    };
    // The command name is parenthesized and may itself contain ") ".
    stat.rsplit_once(") ")
        .and_then(|(_, rest)| rest.chars().next())
        .is_some_and(|state| state == 'Z' || state == 'X')
}

#[cfg(not(target_os = "linux"))]
fn is_zombie(_pid: i32) -> bool {
    false
}
