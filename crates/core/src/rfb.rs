//! RFB 3.3 wire constants used by the repeater handshakes.
//!
//! All multi-byte integers on the wire are big-endian.

/// Protocol version string sent to both endpoints
pub const PROTOCOL_VERSION: &[u8; 12] = b"RFB 003.003\n";

/// Length of a ProtocolVersion message
pub const PROTOCOL_VERSION_LEN: usize = 12;

/// Security type: no authentication (the only type accepted from servers)
pub const AUTH_NONE: u32 = 1;

/// Security type: VNC DES challenge/response (always offered to viewers)
pub const AUTH_VNC: u32 = 2;

/// VNC authentication result: OK
pub const AUTH_RESULT_OK: u32 = 0;

/// Fixed-length identifier block a server sends before anything else
/// (`"ID:1234"` padded with NULs)
pub const IDENTIFIER_BLOCK_LEN: usize = 250;

/// ClientInit "shared session" flag the repeater synthesizes for the server
pub const CLIENT_INIT_SHARED: u8 = 1;
