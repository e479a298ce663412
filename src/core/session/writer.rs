// src/core/session/writer.rs

//! The session's write side: await each request's completion in arrival
//! order, fold scatter replies, and encode with flushes amortized across
//! pipeline bursts.

use super::request::Request;
use super::SessionShared;
use crate::core::PeridotError;
use crate::core::protocol::{RespFrame, RespFrameCodec};
use crate::core::stats::ProxyStats;
use futures::SinkExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tokio::io::{AsyncWrite, AsyncWriteExt, WriteHalf};
use tokio::sync::mpsc;
use tokio_util::codec::FramedWrite;

/// One flush of the per-session counters at most per this interval.
const FLUSH_TICK_NS: i64 = 100_000_000;

/// Writer-local accumulator for one command name; flushed into the
/// process-wide sink.
#[derive(Debug, Default)]
struct OpAccum {
    calls: i64,
    nsecs: i64,
}

pub(crate) struct SessionWriter<S> {
    shared: Arc<SessionShared>,
    conn: FramedWrite<WriteHalf<S>, RespFrameCodec>,
    stats: Arc<ProxyStats>,
    opmap: HashMap<String, OpAccum>,
    last_flush_tick: i64,
    flush_count: u64,
    now: fn() -> i64,
}

impl<S> SessionWriter<S>
where
    S: AsyncWrite + Send + 'static,
{
    pub(crate) fn new(
        shared: Arc<SessionShared>,
        write_half: WriteHalf<S>,
        stats: Arc<ProxyStats>,
        now: fn() -> i64,
    ) -> Self {
        Self {
            shared,
            conn: FramedWrite::new(write_half, RespFrameCodec),
            stats,
            opmap: HashMap::with_capacity(16),
            last_flush_tick: 0,
            flush_count: 0,
            now,
        }
    }

    /// Runs the write loop, then tears the session down: full close, drain
    /// whatever the reader already queued (each counts as a failed op), and
    /// force a final stats flush.
    pub(crate) async fn run(mut self, mut rx: mpsc::Receiver<Arc<Request>>) {
        let result = self.serve(&mut rx).await;
        self.shared.close_with_error(result.as_ref().err(), false);
        let _ = self.conn.get_mut().shutdown().await;
        rx.close();
        while rx.recv().await.is_some() {
            self.stats.incr_op_fails(());
        }
        self.flush_op_stats(true);
    }

    async fn serve(&mut self, rx: &mut mpsc::Receiver<Arc<Request>>) -> Result<(), PeridotError> {
        while let Some(r) = rx.recv().await {
            match self.handle_response(&r).await {
                Ok(resp) => {
                    // Encode without flushing; syscalls are amortized
                    // across the burst below.
                    if let Err(e) = self.conn.feed(resp).await {
                        return Err(self.stats.incr_op_fails(e));
                    }
                }
                Err(e) => {
                    let resp = RespFrame::Error(format!("ERR handle response, {e}"));
                    let _ = self.conn.send(resp).await;
                    return Err(self.stats.incr_op_fails(e));
                }
            }
            if !rx.is_empty() {
                continue;
            }
            if let Err(e) = self.conn.flush().await {
                return Err(self.stats.incr_op_fails(e));
            }
            self.flush_op_stats(false);
        }
        Ok(())
    }

    /// Blocks until this request (and every sub-request sharing its batch)
    /// has completed, then produces the frame to emit.
    async fn handle_response(&mut self, r: &Arc<Request>) -> Result<RespFrame, PeridotError> {
        r.batch.wait().await;
        let reply = match r.take_coalesce() {
            Some(merge) => Some(merge()),
            None => r.take_reply(),
        };
        match reply {
            Some(Ok(resp)) => {
                self.incr_op_stats(r);
                Ok(resp)
            }
            Some(Err(e)) => Err(e),
            None => Err(PeridotError::RespIsRequired),
        }
    }

    fn incr_op_stats(&mut self, r: &Request) {
        let entry = self.opmap.entry(r.op_str.clone()).or_default();
        entry.calls += 1;
        entry.nsecs += (self.now)() - r.start;
    }

    /// Publishes the session-local counters into the process-wide sink, at
    /// most once per 100 ms tick unless forced.
    fn flush_op_stats(&mut self, force: bool) {
        let tick = (self.now)() / FLUSH_TICK_NS;
        if !force && self.last_flush_tick == tick {
            return;
        }
        self.last_flush_tick = tick;

        self.stats
            .incr_op_total(self.shared.recv_total.swap(0, Ordering::Relaxed));
        for (op, acc) in self.opmap.iter_mut() {
            if acc.calls != 0 {
                self.stats.incr_op_stats(op, acc.calls, acc.nsecs);
                acc.calls = 0;
                acc.nsecs = 0;
            }
        }
        self.flush_count = self.flush_count.wrapping_add(1);

        // A pathological command vocabulary would otherwise grow the map
        // without bound.
        if self.opmap.len() > 32 && self.flush_count % 16384 == 0 {
            self.opmap = HashMap::with_capacity(32);
        }
    }
}
