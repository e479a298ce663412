// tests/unit_mget_test.rs

//! MGET scatter/gather: one client reply assembled from per-key
//! sub-requests.

mod support;

use peridot::core::protocol::RespFrame;
use peridot::core::stats::ProxyStats;
use std::sync::atomic::Ordering;
use support::*;

#[tokio::test]
async fn test_mget_scatters_and_reassembles_positionally() {
    let router = MemoryRouter::new();
    router.seed("a", "1");
    router.seed("b", "2");
    let stats = ProxyStats::new();
    let config = test_config();
    let mut client = spawn_session(&config, None, router.clone(), stats);

    let reply = client.roundtrip(&["MGET", "a", "b", "c"]).await;
    assert_eq!(
        reply,
        RespFrame::Array(vec![bulk("1"), bulk("2"), RespFrame::Null])
    );
    // Three sub-requests, one client-visible reply.
    assert_eq!(router.dispatched.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_mget_single_key_degenerates_to_plain_dispatch() {
    let router = MemoryRouter::new();
    router.seed("a", "1");
    let stats = ProxyStats::new();
    let config = test_config();
    let mut client = spawn_session(&config, None, router.clone(), stats);

    // The backend answers the un-scattered MGET itself, array included.
    let reply = client.roundtrip(&["MGET", "a"]).await;
    assert_eq!(reply, RespFrame::Array(vec![bulk("1")]));
    assert_eq!(router.dispatched.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_mget_no_keys_is_an_arity_error() {
    let router = MemoryRouter::new();
    let stats = ProxyStats::new();
    let config = test_config();
    let mut client = spawn_session(&config, None, router.clone(), stats);

    assert_eq!(
        client.roundtrip(&["MGET"]).await,
        error("ERR wrong number of arguments for 'MGET' command")
    );
    assert_eq!(router.dispatched.load(Ordering::SeqCst), 0);
    // Argument errors never terminate the session.
    assert_eq!(client.roundtrip(&["PING", BACKEND_ADDR]).await, status("PONG"));
}

#[tokio::test]
async fn test_mget_fifo_with_out_of_order_sub_completion() {
    let router = MemoryRouter::with_mode(ReplyMode::Shuffled);
    let stats = ProxyStats::new();
    let config = test_config();
    let mut client = spawn_session(&config, None, router, stats);

    client.send(&["MSET", "a", "1", "b", "2"]).await;
    client.send(&["MGET", "a", "b", "missing"]).await;
    client.send(&["GET", "a"]).await;

    assert_eq!(client.recv().await, Some(status("OK")));
    assert_eq!(
        client.recv().await,
        Some(RespFrame::Array(vec![bulk("1"), bulk("2"), RespFrame::Null]))
    );
    assert_eq!(client.recv().await, Some(bulk("1")));
}
