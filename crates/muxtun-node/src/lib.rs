//! The two muxtun roles.
//!
//! The Initiator runs next to the applications being tunneled: it serves
//! the relay page, accepts the page's local WebSocket leg, and fronts a
//! SOCKS5 proxy whose connections become logical streams. The Acceptor
//! runs on the far side: it accepts the page's remote WebSocket leg, and
//! for every inbound logical stream dials the requested target and relays.

pub mod acceptor;
pub mod cli;
pub mod config;
pub mod dialer;
pub mod error;
pub mod initiator;
pub mod page;
pub mod socks5;

pub use cli::{run_acceptor, run_initiator, AcceptorArgs, InitiatorArgs};
pub use config::{AcceptorConfig, InitiatorConfig};
pub use error::NodeError;
