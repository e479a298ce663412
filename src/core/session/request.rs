// src/core/session/request.rs

//! The unit of work flowing through a session: one client command, its
//! completion latch, and the optional reducer that folds scatter
//! sub-requests back into a single reply.

use crate::core::PeridotError;
use crate::core::commands::OpFlag;
use crate::core::protocol::RespFrame;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Notify;

/// Folds the replies of a scatter group into the parent's reply. Run by
/// the writer exactly once, after every sub-request has resolved.
pub type Coalesce = Box<dyn FnOnce() -> Result<RespFrame, PeridotError> + Send>;

/// A single-use counting completion latch.
///
/// The contract is one `wait`, N `add`/`done` pairs, and write-before-done
/// for every field the waiter will read. A batch nobody registered on
/// completes immediately, which is exactly what locally answered commands
/// need.
#[derive(Debug, Default)]
pub struct Batch {
    pending: AtomicUsize,
    notify: Notify,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `n` outstanding completions. Called by dispatches before
    /// they return.
    pub fn add(&self, n: usize) {
        self.pending.fetch_add(n, Ordering::Release);
    }

    /// Signals one completion.
    pub fn done(&self) {
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.notify.notify_waiters();
        }
    }

    /// Blocks the (single) waiter until every registered completion has
    /// been signaled.
    pub async fn wait(&self) {
        loop {
            if self.pending.load(Ordering::Acquire) == 0 {
                return;
            }
            let notified = self.notify.notified();
            // Re-check after arming the notification: `done` may have hit
            // zero between the first load and the registration.
            if self.pending.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// One client command in flight between the reader, a backend, and the
/// writer.
pub struct Request {
    /// Command name plus arguments, as decoded off the wire. Immutable
    /// once the request has been handed to a dispatch.
    pub multi: Vec<RespFrame>,
    /// The classified, uppercased command name.
    pub op_str: String,
    pub op_flag: OpFlag,
    /// Arrival timestamp in nanoseconds, for latency accounting.
    pub start: i64,
    /// Completion latch; shared with every sub-request of a scatter group.
    pub batch: Arc<Batch>,
    reply: Mutex<Option<Result<RespFrame, PeridotError>>>,
    coalesce: Mutex<Option<Coalesce>>,
    broken: Arc<AtomicBool>,
}

impl Request {
    /// Stores the final reply and signals the batch. Backends call this
    /// exactly once per dispatched request.
    pub fn resolve(&self, reply: Result<RespFrame, PeridotError>) {
        *self.reply.lock() = Some(reply);
        self.batch.done();
    }

    /// Answers the request locally, without any batch registration.
    pub fn set_resp(&self, frame: RespFrame) {
        *self.reply.lock() = Some(Ok(frame));
    }

    /// Whether the owning session has been hard-closed. Backends may use
    /// this to short-circuit work, but must still resolve the request.
    pub fn is_broken(&self) -> bool {
        self.broken.load(Ordering::SeqCst)
    }

    pub(crate) fn set_coalesce(&self, merge: Coalesce) {
        *self.coalesce.lock() = Some(merge);
    }

    pub(crate) fn take_coalesce(&self) -> Option<Coalesce> {
        self.coalesce.lock().take()
    }

    pub(crate) fn take_reply(&self) -> Option<Result<RespFrame, PeridotError>> {
        self.reply.lock().take()
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("op_str", &self.op_str)
            .field("op_flag", &self.op_flag)
            .field("args", &(self.multi.len().saturating_sub(1)))
            .finish()
    }
}

/// Builds Requests wired to one session: every request carries the
/// session's broken flag, and sub-requests share their parent's batch so
/// that completing the whole scatter group releases the one waiter.
pub(crate) struct RequestAlloc {
    broken: Arc<AtomicBool>,
}

impl RequestAlloc {
    pub(crate) fn new(broken: Arc<AtomicBool>) -> Self {
        Self { broken }
    }

    pub(crate) fn new_request(&self, multi: Vec<RespFrame>, start: i64) -> Request {
        Request {
            multi,
            op_str: String::new(),
            op_flag: OpFlag::empty(),
            start,
            batch: Arc::new(Batch::new()),
            reply: Mutex::new(None),
            coalesce: Mutex::new(None),
            broken: self.broken.clone(),
        }
    }

    pub(crate) fn sub_request(&self, parent: &Request, multi: Vec<RespFrame>) -> Request {
        Request {
            multi,
            op_str: parent.op_str.clone(),
            op_flag: parent.op_flag,
            start: parent.start,
            batch: parent.batch.clone(),
            reply: Mutex::new(None),
            coalesce: Mutex::new(None),
            broken: self.broken.clone(),
        }
    }
}
