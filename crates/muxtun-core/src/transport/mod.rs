//! Transport adapters and WebSocket upgrade plumbing.

mod upgrade;
mod ws;

pub use upgrade::{
    accept_ws, inspect_head, read_request_head, send_html, send_not_found, send_reject, send_text,
    HeadInspect, RequestHead, INITIAL_BUFFER_SIZE,
};
pub use ws::WsByteStream;
