// src/core/router.rs

//! The contract between a session and the component that owns the slot
//! table and the backend connections. The session core never talks to a
//! backend directly; it hands Requests to a `Router` and waits on each
//! Request's batch.

use crate::core::session::Request;
use crate::core::PeridotError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// The number of hash slots the keyspace is divided into.
pub const MAX_SLOT_NUM: usize = 1024;

/// One slot's assignment, as exposed to clients via SLOTSMAPPING.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SlotInfo {
    pub id: usize,
    #[serde(default)]
    pub backend_addr: String,
    #[serde(default)]
    pub migrate_from: String,
    #[serde(default)]
    pub replica_groups: Vec<Vec<String>>,
}

/// Routes Requests to the backend fleet.
///
/// Signaling discipline: every dispatch that returns success must first
/// register the Request's batch (`r.batch.add(1)`) and later resolve the
/// Request exactly once (`r.resolve(..)`), even when the owning session is
/// already broken — the session's writer is parked on that batch. A
/// dispatch that fails (an `Err`, or `false` from [`Router::dispatch_addr`])
/// must not touch the batch at all.
pub trait Router: Send + Sync {
    /// Routes by hashing the command's key argument. Errors only on
    /// immediate refusal, e.g. when the target backend is unreachable.
    fn dispatch(&self, r: Arc<Request>) -> Result<(), PeridotError>;

    /// Routes to the backend currently owning `slot`.
    fn dispatch_slot(&self, r: Arc<Request>, slot: usize) -> Result<(), PeridotError>;

    /// Routes to a specific backend by address. Returns false when the
    /// address is not part of the fleet.
    fn dispatch_addr(&self, r: Arc<Request>, addr: &str) -> bool;

    /// Whether the router has a published slot table and accepts traffic.
    fn is_online(&self) -> bool;

    /// The full slot table; unassigned slots are `None`.
    fn slots(&self) -> Vec<Option<SlotInfo>>;

    /// One slot's assignment, or `None` when out of range or unassigned.
    fn slot(&self, i: usize) -> Option<SlotInfo>;
}
