//! VNC Repeater Daemon
//!
//! Runs the repeater: one listener for VNC servers, one for viewers, a
//! reaper sweeping half-open slots, and a relay per completed pair.
//!
//! ## Components
//!
//! - **Repeater**: binds both ports and owns every background task
//! - **RepeaterConfig**: addresses, capacity and timing, usually built
//!   from [`vncrepeater_settings::Settings`]

mod connection;
mod listener;
mod reaper;
mod service;

pub use service::{Repeater, RepeaterConfig};

use std::net::SocketAddr;

use thiserror::Error;
use vncrepeater_core::RepeaterError;

#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Repeater error: {0}")]
    Repeater(#[from] RepeaterError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DaemonError>;
