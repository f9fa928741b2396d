//! Failure kinds shared by the bridge and its tooling.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification of every way a bridge can end.
///
/// `Interrupted` is listed here so that status reporting has one vocabulary,
/// but it is not a failure: it is the operator asking the bridge to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    ResourceExhaustion,
    PermissionDenied,
    InvalidHandle,
    TransferError,
    InvalidConfig,
    Interrupted,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::ResourceExhaustion => write!(f, "RESOURCE_EXHAUSTION"),
            ErrorKind::PermissionDenied => write!(f, "PERMISSION_DENIED"),
            ErrorKind::InvalidHandle => write!(f, "INVALID_HANDLE"),
            ErrorKind::TransferError => write!(f, "TRANSFER_ERROR"),
            ErrorKind::InvalidConfig => write!(f, "INVALID_CONFIG"),
            ErrorKind::Interrupted => write!(f, "INTERRUPTED"),
        }
    }
}

impl ErrorKind {
    /// Whether this kind means the bridge ended abnormally.
    pub fn is_failure(self) -> bool {
        !matches!(self, ErrorKind::Interrupted)
    }

    /// Process exit status for a bridge that ended with this kind.
    pub fn exit_code(self) -> i32 {
        if self.is_failure() {
            1
        } else {
            0
        }
    }

    /// Operator hint printed next to the diagnostic.
    pub fn suggestion(self) -> Option<&'static str> {
        match self {
            ErrorKind::ResourceExhaustion => {
                Some("Close unused terminals or raise the kernel.pty.max limit")
            }
            ErrorKind::PermissionDenied => {
                Some("Check that /dev/ptmx is accessible to the current user")
            }
            ErrorKind::InvalidHandle => {
                Some("Pass two distinct, open terminal handles to the relay")
            }
            ErrorKind::TransferError => {
                Some("A peer device went away; restart the bridge to get new ports")
            }
            ErrorKind::InvalidConfig => Some("Run 'ptybridge run --help' for accepted values"),
            ErrorKind::Interrupted => None,
        }
    }
}
