//! Integration tests for slot admission and reclaim
//!
//! 1. Capacity bound: the (N+1)-th pending identifier is turned away
//! 2. Reaper reclaim: abandoned slots are freed and the pool admits again
//! 3. Identifier validation happens before anything else is sent
//! 4. Stopping the repeater closes every waiting connection

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use vncrepeater_core::rfb::{
    AUTH_NONE, AUTH_RESULT_OK, AUTH_VNC, CLIENT_INIT_SHARED, IDENTIFIER_BLOCK_LEN,
    PROTOCOL_VERSION,
};
use vncrepeater_core::IdPolicy;
use vncrepeater_crypto::{encrypt, password_key};
use vncrepeater_daemon::{Repeater, RepeaterConfig};

const WAIT: Duration = Duration::from_secs(5);

// =============================================================================
// HELPERS
// =============================================================================

async fn start_repeater(max_slots: usize, reaper_interval: Duration) -> Repeater {
    Repeater::start(RepeaterConfig {
        max_slots,
        reaper_interval,
        ..RepeaterConfig::loopback()
    })
    .await
    .expect("repeater should start")
}

/// Send only the identifier block
async fn announce(addr: SocketAddr, text: &str) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let mut block = vec![0u8; IDENTIFIER_BLOCK_LEN];
    block[..text.len()].copy_from_slice(text.as_bytes());
    stream.write_all(&block).await.unwrap();
    stream
}

async fn connect_server(addr: SocketAddr, id: &str) -> TcpStream {
    let mut stream = announce(addr, &format!("ID:{}", id)).await;
    let mut version = [0u8; 12];
    stream.read_exact(&mut version).await.unwrap();
    stream.write_all(PROTOCOL_VERSION).await.unwrap();
    stream.write_u32(AUTH_NONE).await.unwrap();
    stream
}

async fn connect_viewer(addr: SocketAddr, password: &str) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let mut version = [0u8; 12];
    stream.read_exact(&mut version).await.unwrap();
    stream.write_all(PROTOCOL_VERSION).await.unwrap();

    assert_eq!(stream.read_u32().await.unwrap(), AUTH_VNC);
    let mut challenge = [0u8; 16];
    stream.read_exact(&mut challenge).await.unwrap();
    let response = encrypt(&password_key(password.as_bytes()), &challenge);
    stream.write_all(&response).await.unwrap();

    assert_eq!(stream.read_u32().await.unwrap(), AUTH_RESULT_OK);
    stream.write_u8(CLIENT_INIT_SHARED).await.unwrap();
    stream
}

async fn expect_paired(server: &mut TcpStream) {
    let mut client_init = [0u8; 1];
    tokio::time::timeout(WAIT, server.read_exact(&mut client_init))
        .await
        .expect("server was never paired")
        .unwrap();
    assert_eq!(client_init[0], CLIENT_INIT_SHARED);
}

/// Read until the repeater closes the connection, returning what arrived
async fn expect_closed(stream: &mut TcpStream) -> Vec<u8> {
    let mut rest = Vec::new();
    let _ = tokio::time::timeout(WAIT, stream.read_to_end(&mut rest))
        .await
        .expect("connection should be closed");
    rest
}

async fn wait_for_slots(repeater: &Repeater, expected: usize) {
    tokio::time::timeout(WAIT, async {
        while repeater.registry().len().unwrap() != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("slot count never reached {}", expected));
}

// =============================================================================
// 1. Capacity bound
// =============================================================================

#[tokio::test]
async fn test_capacity_rejects_extra_identifier() {
    let repeater = start_repeater(2, Duration::from_secs(60)).await;

    let mut first = connect_server(repeater.server_addr(), "1").await;
    let _second = connect_server(repeater.server_addr(), "2").await;
    wait_for_slots(&repeater, 2).await;

    let mut third = connect_server(repeater.server_addr(), "3").await;
    assert!(expect_closed(&mut third).await.is_empty());
    assert_eq!(repeater.registry().len().unwrap(), 2);

    // A full table still completes pairs for slots it already holds
    let _viewer = connect_viewer(repeater.viewer_addr(), "1").await;
    expect_paired(&mut first).await;

    repeater.stop().await.unwrap();
}

#[tokio::test]
async fn test_capacity_applies_to_viewers_too() {
    let repeater = start_repeater(1, Duration::from_secs(60)).await;

    let _waiting = connect_viewer(repeater.viewer_addr(), "10").await;
    wait_for_slots(&repeater, 1).await;

    let mut extra = connect_viewer(repeater.viewer_addr(), "20").await;
    assert!(expect_closed(&mut extra).await.is_empty());
    assert_eq!(repeater.registry().stats().unwrap().pending, 1);

    repeater.stop().await.unwrap();
}

// =============================================================================
// 2. Reaper reclaim
// =============================================================================

#[tokio::test]
async fn test_reaper_frees_abandoned_slot() {
    let repeater = start_repeater(1, Duration::from_millis(20)).await;

    let abandoned = connect_server(repeater.server_addr(), "7").await;
    wait_for_slots(&repeater, 1).await;

    drop(abandoned);
    wait_for_slots(&repeater, 0).await;

    // The pool admits a new identifier again
    let mut server = connect_server(repeater.server_addr(), "8").await;
    wait_for_slots(&repeater, 1).await;
    let _viewer = connect_viewer(repeater.viewer_addr(), "8").await;
    expect_paired(&mut server).await;

    repeater.stop().await.unwrap();
}

#[tokio::test]
async fn test_reaper_leaves_live_slots_alone() {
    let repeater = start_repeater(4, Duration::from_millis(20)).await;

    let mut server = connect_server(repeater.server_addr(), "64").await;
    wait_for_slots(&repeater, 1).await;

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(repeater.registry().len().unwrap(), 1);

    let _viewer = connect_viewer(repeater.viewer_addr(), "64").await;
    expect_paired(&mut server).await;

    repeater.stop().await.unwrap();
}

// =============================================================================
// 3. Identifier validation
// =============================================================================

#[tokio::test]
async fn test_largest_identifier_is_accepted() {
    let repeater = start_repeater(4, Duration::from_secs(60)).await;

    let mut server = connect_server(repeater.server_addr(), "99999999").await;
    let _viewer = connect_viewer(repeater.viewer_addr(), "99999999").await;
    expect_paired(&mut server).await;

    repeater.stop().await.unwrap();
}

#[tokio::test]
async fn test_out_of_range_identifiers_are_closed_before_version() {
    let repeater = start_repeater(4, Duration::from_secs(60)).await;

    for text in ["ID:100000000", "ID:0", "ID:12a", "ID:", "1234"] {
        let mut server = announce(repeater.server_addr(), text).await;
        let received = expect_closed(&mut server).await;
        assert!(received.is_empty(), "{:?} got {:?}", text, received);
    }
    assert!(repeater.registry().is_empty().unwrap());

    repeater.stop().await.unwrap();
}

#[tokio::test]
async fn test_vnc_auth_from_server_is_refused() {
    let repeater = start_repeater(4, Duration::from_secs(60)).await;

    let mut server = announce(repeater.server_addr(), "ID:4444").await;
    let mut version = [0u8; 12];
    server.read_exact(&mut version).await.unwrap();
    server.write_all(PROTOCOL_VERSION).await.unwrap();
    server.write_u32(AUTH_VNC).await.unwrap();

    assert!(expect_closed(&mut server).await.is_empty());
    assert!(repeater.registry().is_empty().unwrap());

    repeater.stop().await.unwrap();
}

#[tokio::test]
async fn test_lenient_policy_accepts_words() {
    let repeater = Repeater::start(RepeaterConfig {
        id_policy: IdPolicy::Lenient,
        ..RepeaterConfig::loopback()
    })
    .await
    .unwrap();

    let mut server = connect_server(repeater.server_addr(), "office-pc").await;
    // Only the first eight bytes reach the DES key
    let _viewer = connect_viewer(repeater.viewer_addr(), "office-p").await;
    expect_paired(&mut server).await;

    repeater.stop().await.unwrap();
}

// =============================================================================
// 4. Stop
// =============================================================================

#[tokio::test]
async fn test_stop_closes_waiting_connections() {
    let repeater = start_repeater(4, Duration::from_secs(60)).await;

    let mut server = connect_server(repeater.server_addr(), "31").await;
    let mut viewer = connect_viewer(repeater.viewer_addr(), "32").await;
    wait_for_slots(&repeater, 2).await;

    let dropped = repeater.stop().await.unwrap();
    assert_eq!(dropped, 2);

    assert!(expect_closed(&mut server).await.is_empty());
    assert!(expect_closed(&mut viewer).await.is_empty());
}
