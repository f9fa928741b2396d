//! Bidirectional byte relay between two controller handles.
//!
//! Each direction is an independent pump: it waits for its source to become
//! readable, reads one chunk and writes that chunk in full to its
//! destination. Both pumps run concurrently on the calling task, so a slow
//! reader on one side never stalls the other direction, and ordering is only
//! guaranteed within a direction.

use std::fmt;
use std::future::Future;

use ptybridge_core::config::RelayConfig;
use tracing::{debug, info, trace};

use crate::daemon::pty::Controller;
use crate::error::BridgeError;

/// Which way bytes are flowing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    AToB,
    BToA,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::AToB => write!(f, "A -> B"),
            Direction::BToA => write!(f, "B -> A"),
        }
    }
}

/// A relay session over two distinct controller handles.
pub struct Relay {
    a: Controller,
    b: Controller,
    config: RelayConfig,
}

impl Relay {
    /// Validate the handles and settings without starting to copy.
    pub fn new(a: Controller, b: Controller, config: RelayConfig) -> Result<Self, BridgeError> {
        config.validate()?;
        if a.same_device(&b) {
            return Err(BridgeError::InvalidHandle(
                "both relay endpoints refer to the same device".to_string(),
            ));
        }
        Ok(Self { a, b, config })
    }

    /// Relay until `shutdown` completes or a transfer fails.
    ///
    /// Returns the output of `shutdown` on cancellation. Both handles are
    /// closed before this returns, whichever way the session ended.
    pub async fn run_until<F: Future>(self, shutdown: F) -> Result<F::Output, BridgeError> {
        let Relay { a, b, config } = self;
        debug!("Relay started with {}-byte chunks", config.chunk_size);

        let result = tokio::select! {
            biased;
            output = shutdown => {
                info!("Relay cancelled");
                Ok(output)
            }
            err = pump(&a, &b, Direction::AToB, config.chunk_size) => Err(err),
            err = pump(&b, &a, Direction::BToA, config.chunk_size) => Err(err),
        };

        drop(a);
        drop(b);
        result
    }
}

/// Copy from `src` to `dst` until something fails.
async fn pump(
    src: &Controller,
    dst: &Controller,
    direction: Direction,
    chunk_size: usize,
) -> BridgeError {
    let mut buf = vec![0u8; chunk_size];
    let mut total: u64 = 0;

    loop {
        let n = match src.read(&mut buf).await {
            Ok(0) => {
                debug!("{}: source closed after {} bytes", direction, total);
                return BridgeError::peer_closed(direction);
            }
            Ok(n) => n,
            Err(e) => {
                debug!("{}: read failed after {} bytes: {}", direction, total, e);
                return BridgeError::transfer(direction, e);
            }
        };

        if let Err(e) = dst.write_all(&buf[..n]).await {
            debug!("{}: write failed after {} bytes: {}", direction, total, e);
            return BridgeError::transfer(direction, e);
        }

        total += n as u64;
        trace!("{}: relayed {} bytes", direction, n);
    }
}
