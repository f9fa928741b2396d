//! Relay tuning.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Largest number of bytes moved by a single read.
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Upper bound for `chunk_size`.
pub const MAX_CHUNK_SIZE: usize = 64 * 1024;

/// Settings for the copy loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayConfig {
    pub chunk_size: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl RelayConfig {
    /// Build a config with the given chunk size, rejecting values out of range.
    pub fn with_chunk_size(chunk_size: usize) -> Result<Self, ConfigError> {
        let config = Self { chunk_size };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 || self.chunk_size > MAX_CHUNK_SIZE {
            return Err(ConfigError::ChunkSizeOutOfRange(self.chunk_size));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    ChunkSizeOutOfRange(usize),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ChunkSizeOutOfRange(size) => write!(
                f,
                "chunk size {} is out of range (expected 1..={})",
                size, MAX_CHUNK_SIZE
            ),
        }
    }
}

impl std::error::Error for ConfigError {}
