//! Where a bridge publishes its peer device paths.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use ptybridge_core::ports::PortListing;
use tracing::{debug, info, warn};

/// Announcement destination, chosen at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    /// Print the listing on standard output.
    pub stdout: bool,
    /// Write the listing to this file.
    pub file: Option<PathBuf>,
}

impl Announcement {
    pub fn stdout() -> Self {
        Self {
            stdout: true,
            file: None,
        }
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            stdout: false,
            file: Some(path.into()),
        }
    }

    /// Also write the listing to `path`.
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    /// Publish the listing to every configured destination.
    pub fn announce(&self, listing: &PortListing) -> Result<()> {
        for (label, path) in listing.labeled() {
            info!("Port {}: {}", label, path.display());
        }

        if self.stdout {
            let stdout = io::stdout();
            write_listing(listing, &mut stdout.lock()).context("Failed to print port listing")?;
        }

        if let Some(path) = &self.file {
            write_listing_file(listing, path)?;
            debug!("Port listing written to {:?}", path);
        }

        Ok(())
    }

    /// Remove the listing file, if one was written.
    pub fn retract(&self) {
        if let Some(path) = &self.file {
            if path.exists() && std::fs::remove_file(path).is_err() {
                warn!("Failed to remove port listing {:?}", path);
            }
        }
    }
}

fn write_listing<W: Write>(listing: &PortListing, out: &mut W) -> io::Result<()> {
    out.write_all(listing.render().as_bytes())?;
    out.flush()
}

/// Write the listing next to its final path and rename it into place, so a
/// reader polling for the file never sees half of it.
fn write_listing_file(listing: &PortListing, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory for {:?}", path))?;
        }
    }

    let mut staging = path.as_os_str().to_owned();
    staging.push(".tmp");
    let staging = PathBuf::from(staging);

    std::fs::write(&staging, listing.render())
        .with_context(|| format!("Failed to write port listing: {:?}", staging))?;
    std::fs::rename(&staging, path)
        .with_context(|| format!("Failed to move port listing into place: {:?}", path))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "ptybridge-announce-{}-{}",
            name,
            std::process::id()
        ))
    }

    #[test]
    fn test_write_listing_one_path_per_line() {
        let listing = PortListing::new("/dev/pts/5", "/dev/pts/6");
        let mut out = Vec::new();
        write_listing(&listing, &mut out).unwrap();
        assert_eq!(out, b"/dev/pts/5\n/dev/pts/6\n");
    }

    #[test]
    fn test_file_announcement_and_retract() {
        let path = temp_path("file").join("bridge.ports");
        let announcement = Announcement::file(&path);
        let listing = PortListing::new("/dev/pts/5", "/dev/pts/6");

        announcement.announce(&listing).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(PortListing::parse(&written).unwrap(), listing);
        assert!(!path.with_extension("ports.tmp").exists());

        announcement.retract();
        assert!(!path.exists());

        let _ = std::fs::remove_dir(path.parent().unwrap());
    }

    #[test]
    fn test_announce_replaces_stale_listing() {
        let path = temp_path("stale");
        std::fs::write(&path, "/dev/pts/98\n/dev/pts/99\n").unwrap();

        let listing = PortListing::new("/dev/pts/1", "/dev/pts/2");
        Announcement::file(&path).announce(&listing).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), listing.render());

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_with_file_keeps_stdout() {
        let announcement = Announcement::stdout().with_file("/tmp/x.ports");
        assert!(announcement.stdout);
        assert_eq!(announcement.file, Some(PathBuf::from("/tmp/x.ports")));
    }
}
