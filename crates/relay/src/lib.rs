//! VNC Repeater relay engine
//!
//! Everything between an accepted socket and a finished session: the RFB
//! preamble toward servers and viewers, the slot registry that pairs them
//! by token, and the byte pump that runs once a pair is complete.

mod handshake;
mod pump;
mod registry;
mod shutdown;

pub use handshake::{
    check_identifier, parse_identifier_block, server_handshake, version_string, viewer_handshake,
    ServerHello, ViewerHello,
};
pub use pump::{relay, run_paired, CloseReason, RelayReport, RELAY_BUFFER_SIZE, RELAY_POLL_INTERVAL};
pub use registry::{
    Endpoint, Liveness, Registration, SlotStats, SlotTable, DEFAULT_MAX_SLOTS,
};
pub use shutdown::Shutdown;
