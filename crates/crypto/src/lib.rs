//! VNC Repeater Cryptography
//!
//! The VNC DES challenge/response primitive and the process-wide challenge
//! key that both handshakes share.

mod challenge;
mod vnc_auth;

pub use challenge::*;
pub use vnc_auth::*;
