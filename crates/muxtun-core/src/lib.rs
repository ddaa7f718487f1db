//! Core I/O primitives shared by the muxtun crates.
//!
//! This crate provides:
//! - Default configuration values
//! - The bidirectional relay engine
//! - The WebSocket byte-stream adapter and upgrade helpers

pub mod defaults;
pub mod io;
pub mod transport;

/// Project name.
pub const PROJECT_NAME: &str = "muxtun";
/// Project version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
