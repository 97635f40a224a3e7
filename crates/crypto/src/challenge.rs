use std::fmt;

use rand::rngs::OsRng;
use rand::RngCore;

use vncrepeater_core::{Token, TOKEN_SIZE};

use crate::{encrypt, password_key};

/// Process-wide 16-byte challenge.
///
/// Every viewer receives it as its VNC authentication challenge, and every
/// server identifier is encrypted over it. Generated once at startup;
/// a restart invalidates every derivation made with the previous key.
#[derive(Clone, PartialEq, Eq)]
pub struct ChallengeKey([u8; TOKEN_SIZE]);

impl ChallengeKey {
    /// Generate a fresh key from the OS RNG
    pub fn generate() -> Self {
        let mut bytes = [0u8; TOKEN_SIZE];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; TOKEN_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; TOKEN_SIZE] {
        &self.0
    }

    /// Token for a server presenting `identifier` as its virtual password.
    ///
    /// A viewer typing the same identifier as its VNC password computes the
    /// same 16 bytes as its challenge response.
    pub fn derive_token(&self, identifier: &[u8]) -> Token {
        Token::new(encrypt(&password_key(identifier), &self.0))
    }
}

impl fmt::Debug for ChallengeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ChallengeKey(..)")
    }
}
