//! Bridge process: PTY allocation, relaying and lifecycle.

pub mod announce;
pub mod bridge;
pub mod launcher;
pub mod paths;
pub mod pty;
pub mod relay;

// Public API - used by main.rs
pub use bridge::{Bridge, BridgeOptions};
