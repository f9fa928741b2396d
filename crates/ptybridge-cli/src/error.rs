//! Error type for the bridge.

use std::io;

use ptybridge_core::config::ConfigError;
use ptybridge_core::error::ErrorKind;
use thiserror::Error;

use crate::daemon::relay::Direction;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Failed to allocate pseudo-terminal: {0}")]
    ResourceExhaustion(String),

    #[error("Not permitted to allocate pseudo-terminal: {0}")]
    PermissionDenied(String),

    #[error("Invalid relay handle: {0}")]
    InvalidHandle(String),

    #[error("Transfer {direction} failed: {source}")]
    Transfer {
        direction: Direction,
        #[source]
        source: io::Error,
    },

    #[error("Invalid relay configuration: {0}")]
    Config(#[from] ConfigError),
}

impl BridgeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BridgeError::ResourceExhaustion(_) => ErrorKind::ResourceExhaustion,
            BridgeError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            BridgeError::InvalidHandle(_) => ErrorKind::InvalidHandle,
            BridgeError::Transfer { .. } => ErrorKind::TransferError,
            BridgeError::Config(_) => ErrorKind::InvalidConfig,
        }
    }

    pub(crate) fn transfer(direction: Direction, source: io::Error) -> Self {
        BridgeError::Transfer { direction, source }
    }

    pub(crate) fn peer_closed(direction: Direction) -> Self {
        Self::transfer(
            direction,
            io::Error::new(io::ErrorKind::UnexpectedEof, "peer device closed"),
        )
    }

    /// Classify a PTY allocation failure.
    ///
    /// portable-pty reports failures as `anyhow` errors, sometimes with the OS
    /// error only in the message, so the text is checked when no `io::Error`
    /// is found in the chain.
    pub(crate) fn allocation(err: anyhow::Error) -> Self {
        let message = format!("{:#}", err);
        let denied = match err.chain().find_map(|e| e.downcast_ref::<io::Error>()) {
            Some(io_err) => io_err.kind() == io::ErrorKind::PermissionDenied,
            None => message.contains("PermissionDenied") || message.contains("Permission denied"),
        };

        if denied {
            BridgeError::PermissionDenied(message)
        } else {
            BridgeError::ResourceExhaustion(message)
        }
    }
}
