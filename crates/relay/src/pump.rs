//! Bidirectional byte relay for a paired server and viewer
//!
//! Each direction has a small fixed buffer. Reads and writes are
//! non-blocking; the loop sleeps on socket readiness bounded by a short
//! timer so it also notices shutdown. Partial writes leave the remainder
//! buffered for the next pass.

use std::fmt;
use std::io;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, info};

use vncrepeater_core::rfb::CLIENT_INIT_SHARED;
use vncrepeater_core::{Result, Token};

use crate::registry::SlotTable;
use crate::shutdown::Shutdown;

/// Per-direction buffer size
pub const RELAY_BUFFER_SIZE: usize = 1024;

/// Upper bound on one readiness wait
pub const RELAY_POLL_INTERVAL: Duration = Duration::from_micros(50);

/// Why a relay stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    ServerClosed,
    ViewerClosed,
    ServerError,
    ViewerError,
    Shutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::ServerClosed => "server closed the connection",
            Self::ViewerClosed => "viewer closed the connection",
            Self::ServerError => "server connection failed",
            Self::ViewerError => "viewer connection failed",
            Self::Shutdown => "repeater shutting down",
        };
        f.write_str(text)
    }
}

/// Summary of a finished relay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayReport {
    pub closed_by: CloseReason,
    pub server_to_viewer: u64,
    pub viewer_to_server: u64,
}

/// Bytes read from one socket and not yet written to the other
struct Pipe {
    buf: [u8; RELAY_BUFFER_SIZE],
    start: usize,
    end: usize,
    total: u64,
}

impl Pipe {
    fn new() -> Self {
        Self {
            buf: [0u8; RELAY_BUFFER_SIZE],
            start: 0,
            end: 0,
            total: 0,
        }
    }

    fn has_room(&self) -> bool {
        self.end < RELAY_BUFFER_SIZE
    }

    fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// One non-blocking read. `Ok(false)` means the peer closed.
    fn fill(&mut self, src: &TcpStream) -> io::Result<bool> {
        if !self.has_room() {
            return Ok(true);
        }
        match src.try_read(&mut self.buf[self.end..]) {
            Ok(0) => Ok(false),
            Ok(n) => {
                self.end += n;
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(true),
            Err(e) => Err(e),
        }
    }

    /// Write as much as the destination takes without blocking
    fn flush(&mut self, dst: &TcpStream) -> io::Result<()> {
        while !self.is_empty() {
            match dst.try_write(&self.buf[self.start..self.end]) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => {
                    self.start += n;
                    self.total += n as u64;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }

        if self.is_empty() {
            self.start = 0;
            self.end = 0;
        } else if self.start > 0 {
            self.buf.copy_within(self.start..self.end, 0);
            self.end -= self.start;
            self.start = 0;
        }
        Ok(())
    }
}

/// Relay bytes between a paired server and viewer until either side ends.
///
/// Sends the synthesized ClientInit to the server first. Both sockets are
/// shut down before returning.
pub async fn relay(mut server: TcpStream, mut viewer: TcpStream, shutdown: &Shutdown) -> RelayReport {
    let mut to_viewer = Pipe::new();
    let mut to_server = Pipe::new();

    let closed_by = match server.write_all(&[CLIENT_INIT_SHARED]).await {
        Err(e) => {
            debug!("Writing ClientInit to server failed: {}", e);
            CloseReason::ServerError
        }
        Ok(()) => loop {
            if shutdown.is_triggered() {
                break CloseReason::Shutdown;
            }

            tokio::select! {
                biased;
                _ = shutdown.wait() => break CloseReason::Shutdown,
                _ = server.readable(), if to_viewer.has_room() => {}
                _ = viewer.readable(), if to_server.has_room() => {}
                _ = viewer.writable(), if !to_viewer.is_empty() => {}
                _ = server.writable(), if !to_server.is_empty() => {}
                _ = tokio::time::sleep(RELAY_POLL_INTERVAL) => {}
            }

            match to_viewer.fill(&server) {
                Ok(true) => {}
                Ok(false) => break CloseReason::ServerClosed,
                Err(e) => {
                    debug!("Server read failed: {}", e);
                    break CloseReason::ServerError;
                }
            }
            match to_server.fill(&viewer) {
                Ok(true) => {}
                Ok(false) => break CloseReason::ViewerClosed,
                Err(e) => {
                    debug!("Viewer read failed: {}", e);
                    break CloseReason::ViewerError;
                }
            }

            if let Err(e) = to_viewer.flush(&viewer) {
                debug!("Viewer write failed: {}", e);
                break CloseReason::ViewerError;
            }
            if let Err(e) = to_server.flush(&server) {
                debug!("Server write failed: {}", e);
                break CloseReason::ServerError;
            }
        },
    };

    let _ = server.shutdown().await;
    let _ = viewer.shutdown().await;

    RelayReport {
        closed_by,
        server_to_viewer: to_viewer.total,
        viewer_to_server: to_server.total,
    }
}

/// Run the relay for a paired slot, then release the slot exactly once
/// whichever side ended it.
pub async fn run_paired(
    registry: &SlotTable<TcpStream>,
    token: Token,
    server: TcpStream,
    viewer: TcpStream,
    shutdown: &Shutdown,
) -> Result<RelayReport> {
    info!("Relay started for token {}", token.short());
    let report = relay(server, viewer, shutdown).await;
    registry.release(&token)?;
    info!(
        "Relay for token {} ended: {} ({} bytes to viewer, {} bytes to server)",
        token.short(),
        report.closed_by,
        report.server_to_viewer,
        report.viewer_to_server
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registration;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;
    use vncrepeater_core::Side;

    /// Returns (remote peer, repeater-side socket)
    async fn tcp_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let peer = TcpStream::connect(addr).await.unwrap();
        let (accepted, _) = listener.accept().await.unwrap();
        (peer, accepted)
    }

    async fn read_n(stream: &mut TcpStream, n: usize) -> Vec<u8> {
        let mut buf = vec![0u8; n];
        tokio::time::timeout(Duration::from_secs(5), stream.read_exact(&mut buf))
            .await
            .expect("read timed out")
            .unwrap();
        buf
    }

    #[tokio::test]
    async fn test_relay_sends_client_init_and_forwards_both_ways() {
        let (mut server_peer, server_conn) = tcp_pair().await;
        let (mut viewer_peer, viewer_conn) = tcp_pair().await;
        let shutdown = Shutdown::new();

        let relay_shutdown = shutdown.clone();
        let task =
            tokio::spawn(async move { relay(server_conn, viewer_conn, &relay_shutdown).await });

        assert_eq!(read_n(&mut server_peer, 1).await, vec![CLIENT_INIT_SHARED]);

        viewer_peer.write_all(b"key event").await.unwrap();
        assert_eq!(read_n(&mut server_peer, 9).await, b"key event".to_vec());

        server_peer.write_all(b"framebuffer").await.unwrap();
        assert_eq!(read_n(&mut viewer_peer, 11).await, b"framebuffer".to_vec());

        drop(viewer_peer);
        let report = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("relay should end")
            .unwrap();

        assert_eq!(report.closed_by, CloseReason::ViewerClosed);
        assert_eq!(report.viewer_to_server, 9);
        assert_eq!(report.server_to_viewer, 11);

        // The server side was shut down too
        let mut rest = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), server_peer.read_to_end(&mut rest))
            .await
            .expect("server side should see EOF")
            .unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_relay_preserves_order_beyond_buffer_size() {
        let (mut server_peer, server_conn) = tcp_pair().await;
        let (mut viewer_peer, viewer_conn) = tcp_pair().await;
        let shutdown = Shutdown::new();

        let relay_shutdown = shutdown.clone();
        let task =
            tokio::spawn(async move { relay(server_conn, viewer_conn, &relay_shutdown).await });
        read_n(&mut server_peer, 1).await;

        let payload: Vec<u8> = (0..64 * 1024).map(|i| (i % 251) as u8).collect();
        let to_send = payload.clone();
        let writer = tokio::spawn(async move {
            server_peer.write_all(&to_send).await.unwrap();
            server_peer
        });

        let received = read_n(&mut viewer_peer, payload.len()).await;
        assert_eq!(received, payload);

        let server_peer = writer.await.unwrap();
        drop(server_peer);
        let report = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("relay should end")
            .unwrap();
        assert_eq!(report.closed_by, CloseReason::ServerClosed);
        assert_eq!(report.server_to_viewer, payload.len() as u64);
    }

    #[tokio::test]
    async fn test_relay_stops_on_shutdown() {
        let (mut server_peer, server_conn) = tcp_pair().await;
        let (_viewer_peer, viewer_conn) = tcp_pair().await;
        let shutdown = Shutdown::new();

        let relay_shutdown = shutdown.clone();
        let task =
            tokio::spawn(async move { relay(server_conn, viewer_conn, &relay_shutdown).await });
        read_n(&mut server_peer, 1).await;

        shutdown.trigger();
        let report = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("relay should notice shutdown")
            .unwrap();
        assert_eq!(report.closed_by, CloseReason::Shutdown);
    }

    #[tokio::test]
    async fn test_run_paired_releases_slot_once() {
        let registry = SlotTable::new(2);
        let token = Token::new([5u8; 16]);
        let (_server_peer, server_conn) = tcp_pair().await;
        let (viewer_peer, viewer_conn) = tcp_pair().await;

        registry.register(token, Side::Server, server_conn).unwrap();
        let Registration::Paired { server, viewer } =
            registry.register(token, Side::Viewer, viewer_conn).unwrap()
        else {
            panic!("expected Paired");
        };
        assert!(registry.contains(&token).unwrap());

        let shutdown = Shutdown::new();
        drop(viewer_peer);

        let report = tokio::time::timeout(
            Duration::from_secs(5),
            run_paired(&registry, token, server, viewer, &shutdown),
        )
        .await
        .expect("relay should end")
        .unwrap();

        assert_eq!(report.closed_by, CloseReason::ViewerClosed);
        assert!(!registry.contains(&token).unwrap());
        assert!(!registry.release(&token).unwrap());
    }

    #[test]
    fn test_close_reason_display() {
        assert_eq!(
            CloseReason::ViewerClosed.to_string(),
            "viewer closed the connection"
        );
        assert_eq!(CloseReason::Shutdown.to_string(), "repeater shutting down");
    }
}
