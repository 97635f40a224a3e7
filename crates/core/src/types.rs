use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{RepeaterError, Result};

/// Size of a VNC authentication challenge and of a pairing token
pub const TOKEN_SIZE: usize = 16;

/// Largest identifier that still fits in an 8-character VNC password
pub const MAX_REPEATER_ID: u32 = 99_999_999;

/// Most digits an identifier may have; longer text would be truncated into
/// the same DES key as some other identifier
pub const MAX_REPEATER_ID_DIGITS: usize = 8;

/// 16-byte pairing key shared by a server-side and a viewer-side connection.
///
/// Servers get theirs from the repeater's DES derivation, viewers hand it
/// over as their VNC authentication response. Two connections pair when
/// their tokens are byte-identical.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token([u8; TOKEN_SIZE]);

impl Token {
    pub fn new(bytes: [u8; TOKEN_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; TOKEN_SIZE] {
        &self.0
    }

    /// Short hex prefix for log lines
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token({})", self.short())
    }
}

/// Which end of a pairing a connection belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// A VNC server dialing in on the server port
    Server,
    /// A VNC viewer dialing in on the viewer port
    Viewer,
}

impl Side {
    pub fn opposite(&self) -> Self {
        match self {
            Self::Server => Self::Viewer,
            Self::Viewer => Self::Server,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Server => f.write_str("server"),
            Self::Viewer => f.write_str("viewer"),
        }
    }
}

/// How strictly server identifiers are checked before token derivation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IdPolicy {
    /// Identifier must be 1 to 8 digits with a value in `1..=99999999`
    #[default]
    Numeric,
    /// Any non-empty ASCII word; only its first 8 bytes form the key
    Lenient,
}

/// Numeric repeater identifier presented by a VNC server.
///
/// The viewer types the same digits as its VNC password, so the textual
/// form (leading zeros included) is what feeds the DES key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepeaterId(String);

impl RepeaterId {
    pub fn parse(text: &str) -> Result<Self> {
        if text.is_empty() {
            return Err(RepeaterError::InvalidIdentifier(
                "identifier is empty".to_string(),
            ));
        }
        if !text.bytes().all(|b| b.is_ascii_digit()) {
            return Err(RepeaterError::InvalidIdentifier(format!(
                "{} is not numeric",
                text
            )));
        }
        if text.len() > MAX_REPEATER_ID_DIGITS {
            return Err(RepeaterError::InvalidIdentifier(format!(
                "{} has more than {} digits",
                text, MAX_REPEATER_ID_DIGITS
            )));
        }

        let value: u32 = text
            .parse()
            .map_err(|_| RepeaterError::InvalidIdentifier(format!("{} is too big", text)))?;
        if value == 0 {
            return Err(RepeaterError::InvalidIdentifier(
                "identifier must be a positive integer".to_string(),
            ));
        }
        if value > MAX_REPEATER_ID {
            return Err(RepeaterError::InvalidIdentifier(format!(
                "{} is larger than {}",
                text, MAX_REPEATER_ID
            )));
        }

        Ok(Self(text.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RepeaterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for RepeaterId {
    type Err = RepeaterError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
