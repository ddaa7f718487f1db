//! I/O utilities for bidirectional relay and stream wrappers.

mod prefixed;
mod relay;

pub use prefixed::PrefixedStream;
pub use relay::{relay_bidirectional, NoOpMetrics, RelayMetrics};
