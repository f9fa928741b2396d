//! Port listing format.
//!
//! A bridge announces its two peer devices as plain text, one absolute path
//! per line, port A first:
//!
//! ```text
//! /dev/pts/3
//! /dev/pts/4
//! ```
//!
//! This is the contract client programs rely on to find their endpoints, so
//! the format carries nothing else.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// The two peer device paths of a running bridge, in allocation order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortListing {
    pub port_a: PathBuf,
    pub port_b: PathBuf,
}

impl PortListing {
    pub fn new(port_a: impl Into<PathBuf>, port_b: impl Into<PathBuf>) -> Self {
        Self {
            port_a: port_a.into(),
            port_b: port_b.into(),
        }
    }

    /// Ports with their labels, in announcement order.
    pub fn labeled(&self) -> [(&'static str, &Path); 2] {
        [("A", &self.port_a), ("B", &self.port_b)]
    }

    /// Render the listing, newline-terminated.
    pub fn render(&self) -> String {
        format!("{}\n{}\n", self.port_a.display(), self.port_b.display())
    }

    /// Parse a listing written by [`PortListing::render`].
    ///
    /// Blank lines and surrounding whitespace are ignored so that files edited
    /// by hand still parse.
    pub fn parse(text: &str) -> Result<Self, ListingError> {
        let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());

        let port_a = parse_port(lines.next(), "A")?;
        let port_b = parse_port(lines.next(), "B")?;

        if let Some(extra) = lines.next() {
            return Err(ListingError::UnexpectedLine(extra.to_string()));
        }

        Ok(Self { port_a, port_b })
    }
}

fn parse_port(line: Option<&str>, label: &'static str) -> Result<PathBuf, ListingError> {
    let line = line.ok_or(ListingError::MissingPort(label))?;
    let path = PathBuf::from(line);
    if !path.is_absolute() {
        return Err(ListingError::NotAbsolute(line.to_string()));
    }
    Ok(path)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListingError {
    MissingPort(&'static str),
    NotAbsolute(String),
    UnexpectedLine(String),
}

impl fmt::Display for ListingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListingError::MissingPort(label) => write!(f, "port {} is missing", label),
            ListingError::NotAbsolute(line) => {
                write!(f, "'{}' is not an absolute device path", line)
            }
            ListingError::UnexpectedLine(line) => {
                write!(f, "unexpected line after port B: '{}'", line)
            }
        }
    }
}

impl std::error::Error for ListingError {}

/// Status of a daemonized bridge, as reported by `ptybridge ports --json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeStatus {
    pub session: String,
    /// PID of the bridge process, if its PID file could be read.
    pub pid: Option<u32>,
    pub alive: bool,
    pub ports: PortListing,
}
