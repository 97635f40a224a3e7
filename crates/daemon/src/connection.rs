//! Per-connection task: preamble, registration, then the relay if paired

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpStream;
use tracing::{debug, error, info, warn};

use vncrepeater_core::{IdPolicy, RepeaterError, Result, Side, Token};
use vncrepeater_crypto::ChallengeKey;
use vncrepeater_relay::{
    run_paired, server_handshake, version_string, viewer_handshake, Registration, Shutdown,
    SlotTable,
};

/// State shared by every connection task
pub(crate) struct ConnectionContext {
    pub registry: Arc<SlotTable<TcpStream>>,
    pub key: Arc<ChallengeKey>,
    pub shutdown: Shutdown,
    pub id_policy: IdPolicy,
}

impl ConnectionContext {
    /// Log a failure and bring the repeater down if it is fatal
    fn report(&self, side: Side, peer: SocketAddr, err: RepeaterError) {
        if err.is_fatal() {
            error!("{} {}: {}; shutting down", side, peer, err);
            self.shutdown.trigger();
        } else {
            warn!("{} {}: {}", side, peer, err);
        }
    }
}

async fn preamble(
    ctx: &ConnectionContext,
    side: Side,
    stream: &mut TcpStream,
    peer: SocketAddr,
) -> Result<Token> {
    match side {
        Side::Server => {
            let hello = server_handshake(stream, &ctx.key, ctx.id_policy).await?;
            info!(
                "Server {} presented identifier {} (token {})",
                peer,
                hello.identifier,
                hello.token.short()
            );
            Ok(hello.token)
        }
        Side::Viewer => {
            let hello = viewer_handshake(stream, &ctx.key).await?;
            info!(
                "Viewer {} ({}, shared flag {}) answered with token {}",
                peer,
                version_string(&hello.peer_version),
                hello.client_init,
                hello.token.short()
            );
            Ok(hello.token)
        }
    }
}

async fn handshake(
    ctx: &ConnectionContext,
    side: Side,
    stream: &mut TcpStream,
    peer: SocketAddr,
) -> Result<Token> {
    tokio::select! {
        _ = ctx.shutdown.wait() => Err(RepeaterError::ShuttingDown),
        result = preamble(ctx, side, stream, peer) => result,
    }
}

/// Drive one accepted connection to completion
pub(crate) async fn handle_connection(
    ctx: Arc<ConnectionContext>,
    side: Side,
    mut stream: TcpStream,
    peer: SocketAddr,
) {
    let token = match handshake(&ctx, side, &mut stream, peer).await {
        Ok(token) => token,
        Err(RepeaterError::ShuttingDown) => return,
        Err(e) => {
            debug!("{} {} failed the handshake: {}", side, peer, e);
            return;
        }
    };

    if ctx.shutdown.is_triggered() {
        return;
    }

    match ctx.registry.register(token, side, stream) {
        Ok(Registration::Pending) => {
            debug!("{} {} is waiting for its peer", side, peer);
        }
        Ok(Registration::Paired { server, viewer }) => {
            if let Err(e) = run_paired(&ctx.registry, token, server, viewer, &ctx.shutdown).await
            {
                ctx.report(side, peer, e);
            }
        }
        Ok(Registration::Rejected { error, conn }) => {
            warn!("Closing {} {}: {}", side, peer, error);
            drop(conn);
        }
        Err(e) => ctx.report(side, peer, e),
    }
}
