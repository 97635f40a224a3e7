use thiserror::Error;

use crate::Side;

#[derive(Error, Debug)]
pub enum RepeaterError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid repeater identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Unsupported authentication type: {0}")]
    UnsupportedAuthType(u32),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("All {capacity} repeater slots are in use")]
    RegistryFull { capacity: usize },

    #[error("A {side} is already waiting on this token")]
    DuplicateSide { side: Side },

    #[error("Slot registry lock poisoned")]
    RegistryPoisoned,

    #[error("Repeater is shutting down")]
    ShuttingDown,
}

impl RepeaterError {
    /// Whether the error leaves the slot registry in an unknown state.
    ///
    /// Fatal errors must bring the whole repeater down; everything else is
    /// local to one connection.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::RegistryPoisoned)
    }
}

pub type Result<T> = std::result::Result<T, RepeaterError>;
