//! RFB preambles the repeater plays toward each real endpoint
//!
//! Toward a VNC server the repeater reads the identifier block, derives the
//! token, and settles on "no authentication". Toward a viewer it runs
//! ordinary VNC authentication with the process-wide challenge and keeps
//! the response as the token. Both stop right before ClientInit reaches
//! the server; the relay engine takes over from there.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use vncrepeater_core::rfb::{
    AUTH_NONE, AUTH_RESULT_OK, AUTH_VNC, IDENTIFIER_BLOCK_LEN, PROTOCOL_VERSION,
    PROTOCOL_VERSION_LEN,
};
use vncrepeater_core::{IdPolicy, RepeaterError, RepeaterId, Result, Token, TOKEN_SIZE};
use vncrepeater_crypto::ChallengeKey;

/// What the server-side preamble learned
#[derive(Debug, Clone)]
pub struct ServerHello {
    pub token: Token,
    /// Identifier text after the final ':'
    pub identifier: String,
    pub peer_version: [u8; PROTOCOL_VERSION_LEN],
}

/// What the viewer-side preamble learned
#[derive(Debug, Clone)]
pub struct ViewerHello {
    pub token: Token,
    /// ClientInit shared flag sent by the viewer; consumed to keep the
    /// stream aligned, the server receives a synthesized one instead
    pub client_init: u8,
    pub peer_version: [u8; PROTOCOL_VERSION_LEN],
}

/// Printable form of a ProtocolVersion message
pub fn version_string(version: &[u8; PROTOCOL_VERSION_LEN]) -> String {
    String::from_utf8_lossy(version).trim_end().to_string()
}

/// Extract the identifier from a server's fixed-length identifier block.
///
/// The block is NUL padded text like `"ID:1234"` or `"host:1234"`; only the
/// first word after the final `':'` matters, so the host part may hold any
/// bytes.
pub fn parse_identifier_block(block: &[u8]) -> Result<&str> {
    let end = block.iter().position(|&b| b == 0).unwrap_or(block.len());
    let text = &block[..end];

    let colon = text.iter().rposition(|&b| b == b':').ok_or_else(|| {
        RepeaterError::Protocol(format!(
            "identifier block {:?} has no ':'",
            String::from_utf8_lossy(text)
        ))
    })?;

    let id = std::str::from_utf8(&text[colon + 1..])
        .ok()
        .filter(|id| id.is_ascii())
        .ok_or_else(|| RepeaterError::InvalidIdentifier("identifier is not ASCII".to_string()))?;

    id.split_ascii_whitespace()
        .next()
        .ok_or_else(|| RepeaterError::InvalidIdentifier("identifier is empty".to_string()))
}

/// Apply the identifier policy, returning the text that keys the derivation
pub fn check_identifier(identifier: &str, policy: IdPolicy) -> Result<String> {
    match policy {
        IdPolicy::Numeric => Ok(RepeaterId::parse(identifier)?.as_str().to_string()),
        IdPolicy::Lenient => {
            if identifier.is_empty() || !identifier.is_ascii() {
                return Err(RepeaterError::InvalidIdentifier(format!(
                    "{:?} is not a usable identifier",
                    identifier
                )));
            }
            Ok(identifier.to_string())
        }
    }
}

async fn read_version<S>(stream: &mut S) -> Result<[u8; PROTOCOL_VERSION_LEN]>
where
    S: AsyncRead + Unpin,
{
    let mut version = [0u8; PROTOCOL_VERSION_LEN];
    stream.read_exact(&mut version).await?;
    Ok(version)
}

/// Run the preamble toward a VNC server connecting on the server port
pub async fn server_handshake<S>(
    stream: &mut S,
    key: &ChallengeKey,
    policy: IdPolicy,
) -> Result<ServerHello>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut block = [0u8; IDENTIFIER_BLOCK_LEN];
    stream.read_exact(&mut block).await?;

    let identifier = check_identifier(parse_identifier_block(&block)?, policy)?;
    let token = key.derive_token(identifier.as_bytes());

    stream.write_all(PROTOCOL_VERSION).await?;
    let peer_version = read_version(stream).await?;
    debug!(
        "Server {} offered {:?}",
        identifier,
        version_string(&peer_version)
    );

    let auth_type = stream.read_u32().await?;
    if auth_type != AUTH_NONE {
        return Err(RepeaterError::UnsupportedAuthType(auth_type));
    }

    Ok(ServerHello {
        token,
        identifier,
        peer_version,
    })
}

/// Run the preamble toward a VNC viewer connecting on the viewer port
pub async fn viewer_handshake<S>(stream: &mut S, key: &ChallengeKey) -> Result<ViewerHello>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(PROTOCOL_VERSION).await?;
    let peer_version = read_version(stream).await?;
    debug!("Viewer offered {:?}", version_string(&peer_version));

    stream.write_u32(AUTH_VNC).await?;
    stream.write_all(key.as_bytes()).await?;

    let mut response = [0u8; TOKEN_SIZE];
    stream.read_exact(&mut response).await?;

    // Never verified here: a wrong password simply never finds its server.
    stream.write_u32(AUTH_RESULT_OK).await?;

    let client_init = stream.read_u8().await?;

    Ok(ViewerHello {
        token: Token::new(response),
        client_init,
        peer_version,
    })
}
