// tests/unit_ping_test.rs

//! PING and INFO probe routing: pseudo-random slot with no argument, a
//! named backend otherwise.

mod support;

use peridot::core::router::MAX_SLOT_NUM;
use peridot::core::stats::ProxyStats;
use support::*;

fn fixed_clock() -> i64 {
    1_724_000_000_123_456_789
}

#[tokio::test]
async fn test_ping_without_args_probes_a_clock_derived_slot() {
    let router = MemoryRouter::new();
    let stats = ProxyStats::new();
    let config = test_config();
    let mut client =
        spawn_session_with_clock(&config, None, router.clone(), stats, Some(fixed_clock));

    assert_eq!(client.roundtrip(&["PING"]).await, status("PONG"));

    let expected = (fixed_clock() as u64 % MAX_SLOT_NUM as u64) as usize;
    assert_eq!(router.slot_probes.lock().as_slice(), &[expected]);
}

#[tokio::test]
async fn test_ping_with_address_routes_to_that_backend() {
    let router = MemoryRouter::new();
    let stats = ProxyStats::new();
    let config = test_config();
    let mut client = spawn_session(&config, None, router.clone(), stats);

    assert_eq!(
        client.roundtrip(&["PING", BACKEND_ADDR]).await,
        status("PONG")
    );
    assert_eq!(router.addr_probes.lock().as_slice(), &[BACKEND_ADDR]);
    // The address argument was stripped before forwarding.
    assert!(router.slot_probes.lock().is_empty());
}

#[tokio::test]
async fn test_ping_unknown_address() {
    let router = MemoryRouter::new();
    let stats = ProxyStats::new();
    let config = test_config();
    let mut client = spawn_session(&config, None, router, stats);

    assert_eq!(
        client.roundtrip(&["PING", "10.9.9.9:6379"]).await,
        error("ERR backend server '10.9.9.9:6379' not found")
    );
    // The miss is answered inline; the session keeps serving.
    assert_eq!(client.roundtrip(&["PING", BACKEND_ADDR]).await, status("PONG"));
}

#[tokio::test]
async fn test_info_without_args_probes_a_clock_derived_slot() {
    let router = MemoryRouter::new();
    let stats = ProxyStats::new();
    let config = test_config();
    let mut client =
        spawn_session_with_clock(&config, None, router.clone(), stats, Some(fixed_clock));

    let reply = client.roundtrip(&["INFO"]).await;
    assert_eq!(reply, bulk(&format!("# Backend\r\naddr:{BACKEND_ADDR}\r\n")));

    let expected = (fixed_clock() as u64 % MAX_SLOT_NUM as u64) as usize;
    assert_eq!(router.slot_probes.lock().as_slice(), &[expected]);
}

#[tokio::test]
async fn test_info_with_unknown_address() {
    let router = MemoryRouter::new();
    let stats = ProxyStats::new();
    let config = test_config();
    let mut client = spawn_session(&config, None, router, stats);

    assert_eq!(
        client.roundtrip(&["INFO", "unknown:1"]).await,
        error("ERR backend server 'unknown:1' not found")
    );
}
