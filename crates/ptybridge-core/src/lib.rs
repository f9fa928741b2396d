//! Core types for ptybridge.
//!
//! ptybridge allocates two pseudo-terminals and relays bytes between them, so
//! that two programs expecting a serial port can talk to each other as if
//! joined by a null-modem cable. This crate holds the pieces shared by the
//! bridge daemon and its command-line tooling.
//!
//! # Modules
//!
//! - [`config`]: relay tuning (chunk size)
//! - [`error`]: failure kinds with exit codes and operator hints
//! - [`ports`]: the plain-text port listing and daemon status

pub mod config;
pub mod error;
pub mod ports;
