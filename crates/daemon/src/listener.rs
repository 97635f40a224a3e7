//! Accept loop for one side's port

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use vncrepeater_core::Side;

use crate::connection::{handle_connection, ConnectionContext};
use crate::{DaemonError, Result};

/// Bind the listening socket for `side`
pub(crate) async fn bind(side: Side, addr: SocketAddr) -> Result<TcpListener> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| DaemonError::Bind { addr, source })?;
    info!("Listening for {}s on {}", side, listener.local_addr()?);
    Ok(listener)
}

/// Accept connections until shutdown, one task per connection.
///
/// On shutdown the socket is closed first, then in-flight connections get
/// `grace` to wind down before they are aborted.
pub(crate) async fn accept_loop(
    listener: TcpListener,
    side: Side,
    ctx: Arc<ConnectionContext>,
    grace: Duration,
) {
    let mut tasks = JoinSet::new();

    loop {
        tokio::select! {
            _ = ctx.shutdown.wait() => break,
            result = listener.accept() => {
                match result {
                    Ok((stream, peer)) => {
                        debug!("Accepted {} connection from {}", side, peer);
                        tasks.spawn(handle_connection(ctx.clone(), side, stream, peer));
                    }
                    Err(e) => {
                        error!("Accept error on {} port: {}", side, e);
                    }
                }
            }
            Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
        }
    }

    drop(listener);

    if tasks.is_empty() {
        debug!("{} listener stopped", side);
        return;
    }

    let in_flight = tasks.len();
    let drained = tokio::time::timeout(grace, async {
        while tasks.join_next().await.is_some() {}
    })
    .await;

    if drained.is_err() {
        warn!(
            "{} of {} {} connection(s) still running after {:?}; aborting",
            tasks.len(),
            in_flight,
            side,
            grace
        );
        tasks.shutdown().await;
    }
    debug!("{} listener stopped", side);
}
