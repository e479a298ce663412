// tests/support/mod.rs

//! Shared test harness: a scripted in-memory backend fleet implementing
//! the `Router` contract, plus a duplex-connected RESP client for driving
//! a real session end to end.

#![allow(dead_code)]

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use peridot::PeridotError;
use peridot::config::ProxyConfig;
use peridot::core::protocol::{RespFrame, RespFrameCodec};
use peridot::core::router::{MAX_SLOT_NUM, Router, SlotInfo};
use peridot::core::session::{Request, Session};
use peridot::core::stats::ProxyStats;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::DuplexStream;
use tokio_util::codec::Framed;

/// The address of the fleet's single scripted backend.
pub const BACKEND_ADDR: &str = "10.0.0.1:6379";

/// How the scripted backend schedules request completions.
#[derive(Clone, Copy, PartialEq)]
pub enum ReplyMode {
    /// Resolve inside dispatch.
    Immediate,
    /// Resolve on a spawned task with a decreasing per-request delay, so
    /// later requests complete before earlier ones.
    Shuffled,
    /// Hold every request until `release()`.
    Gated,
}

/// An in-memory keyspace behind the `Router` contract.
///
/// Writes are applied in dispatch order regardless of the reply mode, so
/// the store contents stay deterministic while completions are reordered.
pub struct MemoryRouter {
    store: Mutex<HashMap<Bytes, Bytes>>,
    mode: ReplyMode,
    online: bool,
    refuse_dispatch: bool,
    slots: Mutex<Vec<Option<SlotInfo>>>,
    gated: Mutex<Vec<(Arc<Request>, Result<RespFrame, PeridotError>)>>,
    pub dispatched: AtomicUsize,
    pub slot_probes: Mutex<Vec<usize>>,
    pub addr_probes: Mutex<Vec<String>>,
}

impl MemoryRouter {
    fn base() -> Self {
        let slots = (0..MAX_SLOT_NUM)
            .map(|id| {
                Some(SlotInfo {
                    id,
                    backend_addr: BACKEND_ADDR.to_string(),
                    migrate_from: String::new(),
                    replica_groups: vec![vec![BACKEND_ADDR.to_string()]],
                })
            })
            .collect();
        Self {
            store: Mutex::new(HashMap::new()),
            mode: ReplyMode::Immediate,
            online: true,
            refuse_dispatch: false,
            slots: Mutex::new(slots),
            gated: Mutex::new(Vec::new()),
            dispatched: AtomicUsize::new(0),
            slot_probes: Mutex::new(Vec::new()),
            addr_probes: Mutex::new(Vec::new()),
        }
    }

    pub fn new() -> Arc<Self> {
        Arc::new(Self::base())
    }

    pub fn with_mode(mode: ReplyMode) -> Arc<Self> {
        let mut router = Self::base();
        router.mode = mode;
        Arc::new(router)
    }

    pub fn offline() -> Arc<Self> {
        let mut router = Self::base();
        router.online = false;
        Arc::new(router)
    }

    pub fn refusing() -> Arc<Self> {
        let mut router = Self::base();
        router.refuse_dispatch = true;
        Arc::new(router)
    }

    pub fn seed(&self, key: &str, value: &str) {
        self.store.lock().insert(
            Bytes::copy_from_slice(key.as_bytes()),
            Bytes::copy_from_slice(value.as_bytes()),
        );
    }

    pub fn get(&self, key: &str) -> Option<Bytes> {
        self.store.lock().get(key.as_bytes()).cloned()
    }

    /// Unassigns one slot, so SLOTSMAPPING serializes it as empty.
    pub fn clear_slot(&self, id: usize) {
        self.slots.lock()[id] = None;
    }

    /// Completes every request held back by `ReplyMode::Gated`, in the
    /// order they were dispatched.
    pub fn release(&self) {
        let pending = std::mem::take(&mut *self.gated.lock());
        for (r, reply) in pending {
            r.resolve(reply);
        }
    }

    pub fn pending(&self) -> usize {
        self.gated.lock().len()
    }

    /// Executes one already-routed command against the keyspace. Mirrors
    /// what a single backend would answer for each sub-request the proxy
    /// produces.
    fn execute(&self, multi: &[RespFrame]) -> Result<RespFrame, PeridotError> {
        let mut args = Vec::with_capacity(multi.len());
        for frame in multi {
            match frame {
                RespFrame::BulkString(b) => args.push(b.clone()),
                other => {
                    return Err(PeridotError::Backend(format!(
                        "non-bulk argument: {}",
                        other.type_name()
                    )));
                }
            }
        }
        if args.is_empty() {
            return Err(PeridotError::Backend("empty command".to_string()));
        }
        let op = String::from_utf8_lossy(&args[0]).to_ascii_uppercase();
        let mut store = self.store.lock();
        match op.as_str() {
            "SET" if args.len() == 3 => {
                store.insert(args[1].clone(), args[2].clone());
                Ok(RespFrame::SimpleString("OK".to_string()))
            }
            "GET" if args.len() == 2 => Ok(match store.get(&args[1]) {
                Some(v) => RespFrame::BulkString(v.clone()),
                None => RespFrame::Null,
            }),
            "MGET" => Ok(RespFrame::Array(
                args[1..]
                    .iter()
                    .map(|k| match store.get(k) {
                        Some(v) => RespFrame::BulkString(v.clone()),
                        None => RespFrame::Null,
                    })
                    .collect(),
            )),
            "MSET" if args.len() >= 3 && args.len() % 2 == 1 => {
                for pair in args[1..].chunks(2) {
                    store.insert(pair[0].clone(), pair[1].clone());
                }
                Ok(RespFrame::SimpleString("OK".to_string()))
            }
            "DEL" => {
                let mut removed = 0;
                for k in &args[1..] {
                    if store.remove(k).is_some() {
                        removed += 1;
                    }
                }
                Ok(RespFrame::Integer(removed))
            }
            "PING" => Ok(RespFrame::SimpleString("PONG".to_string())),
            "INFO" => Ok(RespFrame::bulk(format!(
                "# Backend\r\naddr:{BACKEND_ADDR}\r\n"
            ))),
            "SLOTSINFO" => Ok(RespFrame::Array(Vec::new())),
            "SLOTSSCAN" => Ok(RespFrame::Array(vec![
                RespFrame::bulk("0"),
                RespFrame::Array(Vec::new()),
            ])),
            _ => Ok(RespFrame::Error(format!("ERR unknown command '{op}'"))),
        }
    }

    /// Registers the batch and schedules the completion per the reply mode.
    fn complete(&self, r: Arc<Request>) {
        r.batch.add(1);
        let n = self.dispatched.fetch_add(1, Ordering::SeqCst);
        let reply = self.execute(&r.multi);
        match self.mode {
            ReplyMode::Immediate => r.resolve(reply),
            ReplyMode::Shuffled => {
                let delay = Duration::from_millis(3 * (24u64.saturating_sub(n as u64)));
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    r.resolve(reply);
                });
            }
            ReplyMode::Gated => self.gated.lock().push((r, reply)),
        }
    }
}

impl Router for MemoryRouter {
    fn dispatch(&self, r: Arc<Request>) -> Result<(), PeridotError> {
        if self.refuse_dispatch {
            return Err(PeridotError::Backend("backend is unreachable".to_string()));
        }
        self.complete(r);
        Ok(())
    }

    fn dispatch_slot(&self, r: Arc<Request>, slot: usize) -> Result<(), PeridotError> {
        if self.refuse_dispatch {
            return Err(PeridotError::Backend("backend is unreachable".to_string()));
        }
        self.slot_probes.lock().push(slot);
        self.complete(r);
        Ok(())
    }

    fn dispatch_addr(&self, r: Arc<Request>, addr: &str) -> bool {
        self.addr_probes.lock().push(addr.to_string());
        if addr != BACKEND_ADDR {
            return false;
        }
        self.complete(r);
        true
    }

    fn is_online(&self) -> bool {
        self.online
    }

    fn slots(&self) -> Vec<Option<SlotInfo>> {
        self.slots.lock().clone()
    }

    fn slot(&self, i: usize) -> Option<SlotInfo> {
        self.slots.lock().get(i).cloned().flatten()
    }
}

/// A RESP client talking to an in-process session over a duplex pipe.
pub struct TestClient {
    pub framed: Framed<DuplexStream, RespFrameCodec>,
}

impl TestClient {
    pub async fn send(&mut self, args: &[&str]) {
        self.framed
            .send(cmd(args))
            .await
            .expect("client send failed");
    }

    pub async fn recv(&mut self) -> Option<RespFrame> {
        self.framed
            .next()
            .await
            .map(|r| r.expect("client decode failed"))
    }

    pub async fn roundtrip(&mut self, args: &[&str]) -> RespFrame {
        self.send(args).await;
        self.recv().await.expect("connection closed early")
    }
}

/// Builds a command multi-bulk.
pub fn cmd(args: &[&str]) -> RespFrame {
    RespFrame::Array(
        args.iter()
            .map(|a| RespFrame::BulkString(Bytes::copy_from_slice(a.as_bytes())))
            .collect(),
    )
}

pub fn bulk(s: &str) -> RespFrame {
    RespFrame::BulkString(Bytes::copy_from_slice(s.as_bytes()))
}

pub fn status(s: &str) -> RespFrame {
    RespFrame::SimpleString(s.to_string())
}

pub fn error(s: &str) -> RespFrame {
    RespFrame::Error(s.to_string())
}

pub fn test_config() -> ProxyConfig {
    ProxyConfig::default()
}

/// Installs a quiet tracing subscriber, once per test binary.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("warn"))
        .with_test_writer()
        .try_init();
}

/// Starts a session over an in-memory stream and returns the client end.
pub fn spawn_session(
    config: &ProxyConfig,
    password: Option<&str>,
    router: Arc<MemoryRouter>,
    stats: Arc<ProxyStats>,
) -> TestClient {
    spawn_session_with_clock(config, password, router, stats, None)
}

pub fn spawn_session_with_clock(
    config: &ProxyConfig,
    password: Option<&str>,
    router: Arc<MemoryRouter>,
    stats: Arc<ProxyStats>,
    clock: Option<fn() -> i64>,
) -> TestClient {
    init_tracing();
    let (client_end, server_end) = tokio::io::duplex(256 * 1024);
    let mut session = Session::new(
        server_end,
        "127.0.0.1:54321".parse().expect("test addr"),
        password.map(str::to_string),
        stats,
    );
    if let Some(now) = clock {
        session = session.with_clock(now);
    }
    let router: Arc<dyn Router> = router;
    session.start(router, config);
    TestClient {
        framed: Framed::new(client_end, RespFrameCodec),
    }
}
