// src/core/stats.rs

//! Process-wide operation counters.
//!
//! Sessions do not own globals; they receive an `Arc<ProxyStats>` at
//! construction and flush their locally accumulated per-command counters
//! into it. The frontend exposes the sink to whatever monitoring surface
//! it wants.

use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

/// Accumulated calls and latency for one command name.
#[derive(Debug, Default)]
pub struct OpStats {
    calls: AtomicI64,
    nsecs: AtomicI64,
}

impl OpStats {
    pub fn calls(&self) -> i64 {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn nsecs(&self) -> i64 {
        self.nsecs.load(Ordering::Relaxed)
    }
}

/// The injected process-wide stats sink.
#[derive(Debug, Default)]
pub struct ProxyStats {
    sessions_alive: AtomicI64,
    sessions_total: AtomicI64,
    ops_total: AtomicI64,
    ops_fails: AtomicI64,
    opmap: DashMap<String, Arc<OpStats>>,
}

impl ProxyStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Admits one session, returning the post-increment count of live
    /// sessions so the caller can enforce the admission cap.
    pub fn incr_sessions(&self) -> i64 {
        self.sessions_total.fetch_add(1, Ordering::Relaxed);
        self.sessions_alive.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn decr_sessions(&self) {
        self.sessions_alive.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn sessions_alive(&self) -> i64 {
        self.sessions_alive.load(Ordering::SeqCst)
    }

    pub fn sessions_total(&self) -> i64 {
        self.sessions_total.load(Ordering::Relaxed)
    }

    pub fn incr_op_total(&self, n: i64) {
        if n != 0 {
            self.ops_total.fetch_add(n, Ordering::Relaxed);
        }
    }

    /// Counts a failed operation and hands the error back, so return sites
    /// can write `return Err(stats.incr_op_fails(e))` without ceremony.
    pub fn incr_op_fails<E>(&self, err: E) -> E {
        self.ops_fails.fetch_add(1, Ordering::Relaxed);
        err
    }

    pub fn incr_op_stats(&self, opstr: &str, calls: i64, nsecs: i64) {
        let entry = self
            .opmap
            .entry(opstr.to_string())
            .or_default()
            .clone();
        entry.calls.fetch_add(calls, Ordering::Relaxed);
        entry.nsecs.fetch_add(nsecs, Ordering::Relaxed);
    }

    pub fn ops_total(&self) -> i64 {
        self.ops_total.load(Ordering::Relaxed)
    }

    pub fn ops_fails(&self) -> i64 {
        self.ops_fails.load(Ordering::Relaxed)
    }

    /// The accumulated counters for one command, if any were flushed.
    pub fn op_stats(&self, opstr: &str) -> Option<Arc<OpStats>> {
        self.opmap.get(opstr).map(|e| e.value().clone())
    }
}
