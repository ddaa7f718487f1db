//! Single-slot multiplexing session manager.
//!
//! One relay channel carries one multiplexing session at a time. The
//! [`SessionManager`] owns that slot: attaching a new channel replaces (and
//! cancels) whatever was there before, and stream openers that arrive while
//! the slot is empty wait for the next attachment instead of failing fast.

mod manager;

pub use manager::{AttachedSession, SessionManager, SessionMode};

use std::time::Duration;

/// Errors surfaced to stream openers.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("no tunnel session attached within {0:?}")]
    TunnelUnavailable(Duration),

    #[error("stream open cancelled by shutdown")]
    Cancelled,

    #[error("multiplexing error: {0}")]
    Mux(String),
}
