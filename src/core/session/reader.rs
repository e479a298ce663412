// src/core/session/reader.rs

//! The session's read side: decode one multi-bulk at a time, classify it,
//! hand it to the router (or answer it locally), and push it onto the task
//! channel in arrival order.

use super::request::{Request, RequestAlloc};
use super::SessionShared;
use crate::core::PeridotError;
use crate::core::commands::{self, helpers};
use crate::core::protocol::{self, RespFrame, RespFrameCodec};
use crate::core::router::{MAX_SLOT_NUM, Router, SlotInfo};
use crate::core::stats::ProxyStats;
use futures::StreamExt;
use std::io;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use subtle::ConstantTimeEq;
use tokio::io::{AsyncRead, ReadHalf};
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tracing::debug;

/// The outcome of classifying and routing one request.
enum Handled {
    /// The request is in flight (or answered locally) and ready for the
    /// task channel.
    Ready(Arc<Request>),
    /// The request could not be handled; it is still queued so the client
    /// sees a terminal error reply, and then the session dies.
    Abort(Arc<Request>, PeridotError),
}

pub(crate) struct SessionReader<S> {
    shared: Arc<SessionShared>,
    conn: FramedRead<ReadHalf<S>, RespFrameCodec>,
    auth: Option<String>,
    authorized: bool,
    quit: bool,
    alloc: RequestAlloc,
    stats: Arc<ProxyStats>,
    now: fn() -> i64,
}

impl<S> SessionReader<S>
where
    S: AsyncRead + Send + 'static,
{
    pub(crate) fn new(
        shared: Arc<SessionShared>,
        read_half: ReadHalf<S>,
        auth: Option<String>,
        alloc: RequestAlloc,
        stats: Arc<ProxyStats>,
        now: fn() -> i64,
    ) -> Self {
        Self {
            shared,
            conn: FramedRead::new(read_half, RespFrameCodec),
            auth,
            authorized: false,
            quit: false,
            alloc,
            stats,
            now,
        }
    }

    /// Runs the read loop to completion. Dropping `tx` on return is what
    /// closes the task channel, on every exit path.
    pub(crate) async fn run(mut self, tx: mpsc::Sender<Arc<Request>>, router: Arc<dyn Router>) {
        if let Err(e) = self.serve(&tx, router.as_ref()).await {
            self.shared.close_with_error(Some(&e), true);
        }
    }

    async fn serve(
        &mut self,
        tx: &mpsc::Sender<Arc<Request>>,
        router: &dyn Router,
    ) -> Result<(), PeridotError> {
        while !self.quit {
            let frame = tokio::select! {
                biased;
                _ = self.shared.killed() => {
                    return Err(PeridotError::SessionClosed);
                }
                decoded = self.conn.next() => match decoded {
                    Some(Ok(frame)) => frame,
                    Some(Err(e)) => return Err(e),
                    None => {
                        return Err(PeridotError::from(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "connection closed by peer",
                        )));
                    }
                },
            };

            let multi = protocol::into_multi_bulk(frame)?;

            self.shared.recv_total.fetch_add(1, Ordering::Relaxed);
            let start = (self.now)();
            self.shared
                .last_op_unix
                .store(start / 1_000_000_000, Ordering::Relaxed);
            self.shared.ops.fetch_add(1, Ordering::Relaxed);

            let r = self.alloc.new_request(multi, start);
            match self.handle_request(r, router) {
                Handled::Ready(r) => {
                    if tx.send(r).await.is_err() {
                        return Err(PeridotError::SessionClosed);
                    }
                }
                Handled::Abort(r, e) => {
                    // Queue the terminal reply first; the writer drains the
                    // channel before it observes the close.
                    r.set_resp(RespFrame::Error(format!("ERR handle request, {e}")));
                    let _ = tx.send(r).await;
                    return Err(self.stats.incr_op_fails(e));
                }
            }
        }
        Ok(())
    }

    fn handle_request(&mut self, mut r: Request, router: &dyn Router) -> Handled {
        let (op_str, op_flag) = match commands::get_op_info(&r.multi) {
            Ok(info) => info,
            Err(e) => return Handled::Abort(Arc::new(r), e),
        };
        let op = op_str.clone();
        r.op_str = op_str;
        r.op_flag = op_flag;
        debug!("session [{}] request {:?}", self.shared.remote(), r);

        if r.op_flag.is_not_allowed() {
            return Handled::Abort(Arc::new(r), PeridotError::CommandNotAllowed(op));
        }

        match op.as_str() {
            "QUIT" => {
                self.quit = true;
                r.set_resp(RespFrame::ok());
                return Handled::Ready(Arc::new(r));
            }
            "AUTH" => return self.handle_auth(r),
            _ => {}
        }

        if !self.authorized {
            if self.auth.is_some() {
                r.set_resp(RespFrame::Error("NOAUTH Authentication required".to_string()));
                return Handled::Ready(Arc::new(r));
            }
            self.authorized = true;
        }

        match op.as_str() {
            "SELECT" => self.handle_select(r),
            "PING" | "INFO" => self.handle_probe(r, router),
            "MGET" => self.handle_mget(r, router),
            "MSET" => self.handle_mset(r, router),
            "DEL" => self.handle_del(r, router),
            "SLOTSINFO" => self.handle_slots_info(r, router),
            "SLOTSSCAN" => self.handle_slots_scan(r, router),
            "SLOTSMAPPING" => self.handle_slots_mapping(r, router),
            _ => self.dispatch(r, router),
        }
    }

    /// Plain single-key dispatch; the router picks the backend by key hash.
    fn dispatch(&self, r: Request, router: &dyn Router) -> Handled {
        let r = Arc::new(r);
        match router.dispatch(r.clone()) {
            Ok(()) => Handled::Ready(r),
            Err(e) => Handled::Abort(r, e),
        }
    }

    /// Dispatch to an explicitly named backend, answering inline when the
    /// address is unknown to the router.
    fn dispatch_addr(&self, r: Request, router: &dyn Router, addr: String) -> Handled {
        let r = Arc::new(r);
        if !router.dispatch_addr(r.clone(), &addr) {
            r.set_resp(RespFrame::Error(format!(
                "ERR backend server '{addr}' not found"
            )));
        }
        Handled::Ready(r)
    }

    fn handle_auth(&mut self, r: Request) -> Handled {
        if r.multi.len() != 2 {
            r.set_resp(arity_error("AUTH"));
            return Handled::Ready(Arc::new(r));
        }
        match &self.auth {
            None => r.set_resp(RespFrame::Error(
                "ERR Client sent AUTH, but no password is set".to_string(),
            )),
            Some(password) => {
                let accepted = helpers::arg_bytes(&r.multi, 1)
                    .map(|given| bool::from(password.as_bytes().ct_eq(given.as_ref())))
                    .unwrap_or(false);
                if accepted {
                    self.authorized = true;
                    r.set_resp(RespFrame::ok());
                } else {
                    self.authorized = false;
                    r.set_resp(RespFrame::Error("ERR invalid password".to_string()));
                }
            }
        }
        Handled::Ready(Arc::new(r))
    }

    fn handle_select(&self, r: Request) -> Handled {
        if r.multi.len() != 2 {
            r.set_resp(arity_error("SELECT"));
            return Handled::Ready(Arc::new(r));
        }
        let db = helpers::arg_bytes(&r.multi, 1).and_then(|b| helpers::btoi64(b).ok());
        match db {
            None => r.set_resp(RespFrame::Error("ERR invalid DB index".to_string())),
            Some(0) => r.set_resp(RespFrame::ok()),
            Some(_) => r.set_resp(RespFrame::Error(
                "ERR invalid DB index, only accept DB 0".to_string(),
            )),
        }
        Handled::Ready(Arc::new(r))
    }

    /// PING and INFO: with no argument, probe a pseudo-random slot so the
    /// load spreads across the fleet; with an address argument, probe that
    /// backend specifically.
    fn handle_probe(&self, mut r: Request, router: &dyn Router) -> Handled {
        if r.multi.len() == 1 {
            let slot = ((self.now)() as u64 % MAX_SLOT_NUM as u64) as usize;
            let r = Arc::new(r);
            return match router.dispatch_slot(r.clone(), slot) {
                Ok(()) => Handled::Ready(r),
                Err(e) => Handled::Abort(r, e),
            };
        }
        let Some(addr) = helpers::arg_string(&r.multi, 1) else {
            return Handled::Abort(Arc::new(r), PeridotError::BadMultiBulk);
        };
        r.multi.remove(1);
        self.dispatch_addr(r, router, addr)
    }

    fn handle_slots_info(&self, mut r: Request, router: &dyn Router) -> Handled {
        if r.multi.len() != 2 {
            r.set_resp(arity_error("SLOTSINFO"));
            return Handled::Ready(Arc::new(r));
        }
        let Some(addr) = helpers::arg_string(&r.multi, 1) else {
            return Handled::Abort(Arc::new(r), PeridotError::BadMultiBulk);
        };
        r.multi.remove(1);
        self.dispatch_addr(r, router, addr)
    }

    fn handle_slots_scan(&self, r: Request, router: &dyn Router) -> Handled {
        if r.multi.len() <= 2 {
            r.set_resp(arity_error("SLOTSSCAN"));
            return Handled::Ready(Arc::new(r));
        }
        let raw = helpers::arg_bytes(&r.multi, 1).cloned().unwrap_or_default();
        match helpers::btoi64(&raw) {
            Err(e) => {
                r.set_resp(RespFrame::Error(format!(
                    "ERR parse slotnum '{}' failed, {}",
                    String::from_utf8_lossy(&raw),
                    e
                )));
                Handled::Ready(Arc::new(r))
            }
            Ok(slot) if slot < 0 || slot >= MAX_SLOT_NUM as i64 => {
                r.set_resp(RespFrame::Error(format!(
                    "ERR parse slotnum '{}' failed, out of range",
                    String::from_utf8_lossy(&raw)
                )));
                Handled::Ready(Arc::new(r))
            }
            Ok(slot) => {
                let r = Arc::new(r);
                match router.dispatch_slot(r.clone(), slot as usize) {
                    Ok(()) => Handled::Ready(r),
                    Err(e) => Handled::Abort(r, e),
                }
            }
        }
    }

    fn handle_slots_mapping(&self, r: Request, router: &dyn Router) -> Handled {
        let nblks = r.multi.len() - 1;
        if nblks >= 2 {
            r.set_resp(arity_error("SLOTSMAPPING"));
            return Handled::Ready(Arc::new(r));
        }
        if nblks == 0 {
            let array = router.slots().into_iter().map(slot_resp).collect();
            r.set_resp(RespFrame::Array(array));
            return Handled::Ready(Arc::new(r));
        }
        let raw = helpers::arg_bytes(&r.multi, 1).cloned().unwrap_or_default();
        match helpers::btoi64(&raw) {
            Err(e) => r.set_resp(RespFrame::Error(format!(
                "ERR parse slotnum '{}' failed, {}",
                String::from_utf8_lossy(&raw),
                e
            ))),
            Ok(slot) if slot < 0 || slot >= MAX_SLOT_NUM as i64 => {
                r.set_resp(RespFrame::Error(format!(
                    "ERR parse slotnum '{}' failed, out of range",
                    String::from_utf8_lossy(&raw)
                )));
            }
            Ok(slot) => r.set_resp(slot_resp(router.slot(slot as usize))),
        }
        Handled::Ready(Arc::new(r))
    }

    fn handle_mget(&self, r: Request, router: &dyn Router) -> Handled {
        let nkeys = r.multi.len() - 1;
        match nkeys {
            0 => {
                r.set_resp(arity_error("MGET"));
                Handled::Ready(Arc::new(r))
            }
            1 => self.dispatch(r, router),
            _ => {
                let mut subs = Vec::with_capacity(nkeys);
                for i in 0..nkeys {
                    let multi = vec![r.multi[0].clone(), r.multi[i + 1].clone()];
                    let sub = Arc::new(self.alloc.sub_request(&r, multi));
                    if let Err(e) = router.dispatch(sub.clone()) {
                        return Handled::Abort(Arc::new(r), e);
                    }
                    subs.push(sub);
                }
                r.set_coalesce(Box::new(move || {
                    let mut array = Vec::with_capacity(subs.len());
                    for sub in &subs {
                        match sub.take_reply() {
                            Some(Ok(RespFrame::Array(items))) if items.len() == 1 => {
                                array.extend(items);
                            }
                            Some(Ok(other)) => {
                                let len = match &other {
                                    RespFrame::Array(a) => a.len(),
                                    _ => 0,
                                };
                                return Err(PeridotError::BadBackendReply(format!(
                                    "bad mget resp: {} array.len = {len}",
                                    other.type_name()
                                )));
                            }
                            Some(Err(e)) => return Err(e),
                            None => return Err(PeridotError::RespIsRequired),
                        }
                    }
                    Ok(RespFrame::Array(array))
                }));
                Handled::Ready(Arc::new(r))
            }
        }
    }

    fn handle_mset(&self, r: Request, router: &dyn Router) -> Handled {
        let nblks = r.multi.len() - 1;
        if nblks == 0 || nblks % 2 != 0 {
            r.set_resp(arity_error("MSET"));
            return Handled::Ready(Arc::new(r));
        }
        if nblks == 2 {
            return self.dispatch(r, router);
        }
        let mut subs = Vec::with_capacity(nblks / 2);
        for i in 0..nblks / 2 {
            let multi = vec![
                r.multi[0].clone(),
                r.multi[i * 2 + 1].clone(),
                r.multi[i * 2 + 2].clone(),
            ];
            let sub = Arc::new(self.alloc.sub_request(&r, multi));
            if let Err(e) = router.dispatch(sub.clone()) {
                return Handled::Abort(Arc::new(r), e);
            }
            subs.push(sub);
        }
        r.set_coalesce(Box::new(move || {
            let mut last = None;
            for sub in &subs {
                match sub.take_reply() {
                    Some(Ok(status @ RespFrame::SimpleString(_))) => last = Some(status),
                    Some(Ok(other)) => {
                        return Err(PeridotError::BadBackendReply(format!(
                            "bad mset resp: {} value.len = {}",
                            other.type_name(),
                            value_len(&other)
                        )));
                    }
                    Some(Err(e)) => return Err(e),
                    None => return Err(PeridotError::RespIsRequired),
                }
            }
            last.ok_or(PeridotError::RespIsRequired)
        }));
        Handled::Ready(Arc::new(r))
    }

    fn handle_del(&self, r: Request, router: &dyn Router) -> Handled {
        let nkeys = r.multi.len() - 1;
        match nkeys {
            0 => {
                r.set_resp(arity_error("DEL"));
                Handled::Ready(Arc::new(r))
            }
            1 => self.dispatch(r, router),
            _ => {
                let mut subs = Vec::with_capacity(nkeys);
                for i in 0..nkeys {
                    let multi = vec![r.multi[0].clone(), r.multi[i + 1].clone()];
                    let sub = Arc::new(self.alloc.sub_request(&r, multi));
                    if let Err(e) = router.dispatch(sub.clone()) {
                        return Handled::Abort(Arc::new(r), e);
                    }
                    subs.push(sub);
                }
                r.set_coalesce(Box::new(move || {
                    let mut deleted = 0i64;
                    for sub in &subs {
                        match sub.take_reply() {
                            Some(Ok(RespFrame::Integer(n))) => {
                                if n != 0 {
                                    deleted += 1;
                                }
                            }
                            Some(Ok(other)) => {
                                return Err(PeridotError::BadBackendReply(format!(
                                    "bad mdel resp: {} value.len = {}",
                                    other.type_name(),
                                    value_len(&other)
                                )));
                            }
                            Some(Err(e)) => return Err(e),
                            None => return Err(PeridotError::RespIsRequired),
                        }
                    }
                    Ok(RespFrame::Integer(deleted))
                }));
                Handled::Ready(Arc::new(r))
            }
        }
    }
}

fn arity_error(cmd: &str) -> RespFrame {
    RespFrame::Error(format!("ERR wrong number of arguments for '{cmd}' command"))
}

fn value_len(frame: &RespFrame) -> usize {
    match frame {
        RespFrame::SimpleString(s) | RespFrame::Error(s) => s.len(),
        RespFrame::BulkString(b) => b.len(),
        _ => 0,
    }
}

/// One slot's SLOTSMAPPING entry: `[id, backend_addr, migrate_from,
/// [[addr, ...], ...]]`; an unassigned slot is an empty array.
fn slot_resp(slot: Option<SlotInfo>) -> RespFrame {
    let Some(m) = slot else {
        return RespFrame::Array(Vec::new());
    };
    let groups = m
        .replica_groups
        .into_iter()
        .map(|group| RespFrame::Array(group.into_iter().map(RespFrame::bulk).collect()))
        .collect();
    RespFrame::Array(vec![
        RespFrame::bulk(m.id.to_string()),
        RespFrame::bulk(m.backend_addr),
        RespFrame::bulk(m.migrate_from),
        RespFrame::Array(groups),
    ])
}
