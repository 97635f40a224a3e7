//! VNC Repeater Core Types
//!
//! Shared types, RFB wire constants and the error taxonomy used by every
//! repeater crate.

mod error;
pub mod rfb;
mod types;

pub use error::*;
pub use types::*;
