// src/core/session/mod.rs

//! One connected client: admission, the reader/writer task pair, and
//! orderly teardown.

mod reader;
mod request;
mod writer;

pub use request::{Batch, Coalesce, Request};

use crate::config::ProxyConfig;
use crate::core::PeridotError;
use crate::core::protocol::{RespFrame, RespFrameCodec};
use crate::core::router::Router;
use crate::core::stats::ProxyStats;
use futures::SinkExt;
use reader::SessionReader;
use request::RequestAlloc;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::info;
use writer::SessionWriter;

/// Runs a closure's worth of work at most once across threads; later
/// callers no-op immediately.
#[derive(Debug, Default)]
struct OnceGate(AtomicBool);

impl OnceGate {
    /// True for exactly one caller.
    fn enter(&self) -> bool {
        !self.0.swap(true, Ordering::AcqRel)
    }
}

/// The wall clock, as nanoseconds since the Unix epoch. Sessions take this
/// as an injectable function so probe routing and stats ticks are
/// deterministic under test.
pub fn unix_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or_default()
}

/// State shared by the session's reader, writer, and anything holding the
/// session for introspection.
pub struct SessionShared {
    remote: SocketAddr,
    create_unix: i64,
    pub(crate) ops: AtomicI64,
    pub(crate) last_op_unix: AtomicI64,
    /// Requests decoded but not yet flushed into the stats sink.
    pub(crate) recv_total: AtomicI64,
    broken: Arc<AtomicBool>,
    kill: CancellationToken,
    exit: OnceGate,
}

#[derive(Serialize)]
struct SessionSummary<'a> {
    ops: i64,
    create: i64,
    #[serde(skip_serializing_if = "is_zero")]
    lastop: i64,
    remote: &'a str,
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

impl SessionShared {
    fn new(remote: SocketAddr, create_unix: i64) -> Arc<Self> {
        Arc::new(Self {
            remote,
            create_unix,
            ops: AtomicI64::new(0),
            last_op_unix: AtomicI64::new(0),
            recv_total: AtomicI64::new(0),
            broken: Arc::new(AtomicBool::new(false)),
            kill: CancellationToken::new(),
            exit: OnceGate::default(),
        })
    }

    /// JSON summary `{ops, create, lastop, remote}`, readable at any point
    /// of the lifecycle including a partial close.
    pub fn describe(&self) -> String {
        let remote = self.remote.to_string();
        let summary = SessionSummary {
            ops: self.ops.load(Ordering::Relaxed),
            create: self.create_unix,
            lastop: self.last_op_unix.load(Ordering::Relaxed),
            remote: &remote,
        };
        serde_json::to_string(&summary).unwrap_or_default()
    }

    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    pub fn is_broken(&self) -> bool {
        self.broken.load(Ordering::SeqCst)
    }

    /// Tears the session down. Idempotent: the close is logged once, no
    /// matter how many paths race into it.
    ///
    /// `half` leaves the write side intact so the writer can drain queued
    /// responses after the reader saw EOF; a full close also marks the
    /// session broken and unblocks a reader parked on the socket.
    pub fn close_with_error(&self, err: Option<&PeridotError>, half: bool) {
        if self.exit.enter() {
            match err {
                Some(e) => info!("session [{}] closed: {}, error: {}", self.remote, self.describe(), e),
                None => info!("session [{}] closed: {}, quit", self.remote, self.describe()),
            }
        }
        if !half {
            self.broken.store(true, Ordering::SeqCst);
            self.kill.cancel();
        }
    }

    pub(crate) async fn killed(&self) {
        self.kill.cancelled().await;
    }

    pub(crate) fn broken_flag(&self) -> Arc<AtomicBool> {
        self.broken.clone()
    }
}

/// A freshly accepted client connection, not yet serving traffic.
///
/// `start` consumes the session, which is what makes "start runs at most
/// once" a compile-time property rather than a runtime check.
pub struct Session<S> {
    conn: S,
    auth: Option<String>,
    shared: Arc<SessionShared>,
    stats: Arc<ProxyStats>,
    now: fn() -> i64,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    pub fn new(
        conn: S,
        remote: SocketAddr,
        auth: Option<String>,
        stats: Arc<ProxyStats>,
    ) -> Self {
        let shared = SessionShared::new(remote, unix_nanos() / 1_000_000_000);
        info!("session [{}] create: {}", remote, shared.describe());
        Self {
            conn,
            auth,
            shared,
            stats,
            now: unix_nanos,
        }
    }

    /// Replaces the wall clock, pinning probe-slot selection and stats
    /// flush ticks for tests.
    pub fn with_clock(mut self, now: fn() -> i64) -> Self {
        self.now = now;
        self
    }

    pub fn shared(&self) -> Arc<SessionShared> {
        self.shared.clone()
    }

    /// Admits the session and spawns its reader/writer pair.
    ///
    /// Refusals (admission cap, offline router) are answered and closed
    /// from a detached task so the caller's accept loop never blocks on a
    /// client.
    pub fn start(self, router: Arc<dyn Router>, config: &ProxyConfig) {
        let Session {
            conn,
            auth,
            shared,
            stats,
            now,
        } = self;

        if stats.incr_sessions() > config.proxy_max_clients as i64 {
            refuse(
                conn,
                shared,
                "ERR max number of clients reached",
                PeridotError::TooManySessions,
            );
            stats.decr_sessions();
            return;
        }

        if !router.is_online() {
            refuse(
                conn,
                shared,
                "ERR router is not online",
                PeridotError::RouterNotOnline,
            );
            stats.decr_sessions();
            return;
        }

        let (read_half, write_half) = tokio::io::split(conn);
        let (tx, rx) = mpsc::channel(config.session_max_pipeline);

        let writer = SessionWriter::new(shared.clone(), write_half, stats.clone(), now);
        let writer_task = tokio::spawn(writer.run(rx));

        let alloc = RequestAlloc::new(shared.broken_flag());
        let reader = SessionReader::new(shared, read_half, auth, alloc, stats.clone(), now);
        tokio::spawn(async move {
            reader.run(tx, router).await;
            // The writer owns the final flush; only after it returns is
            // this session really gone.
            let _ = writer_task.await;
            stats.decr_sessions();
        });
    }
}

/// Answers an admission refusal and closes, off the accept path.
fn refuse<S>(conn: S, shared: Arc<SessionShared>, message: &'static str, err: PeridotError)
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        let mut framed = Framed::new(conn, RespFrameCodec);
        let _ = framed.send(RespFrame::Error(message.to_string())).await;
        shared.close_with_error(Some(&err), false);
    });
}
