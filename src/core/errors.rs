// src/core/errors.rs

//! Defines the primary error type for the session core.

use std::sync::Arc;
use thiserror::Error;

/// The main error enum, representing transport and session failures.
///
/// Client-visible protocol mistakes (wrong arity, bad DB index, unknown
/// backend address) are not represented here: those are answered inline as
/// RESP error frames and the session keeps running. A `PeridotError`
/// terminates the session that observes it.
#[derive(Error, Debug)]
pub enum PeridotError {
    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),

    /// Internal codec marker: the buffer does not yet hold a full frame.
    #[error("incomplete frame in stream")]
    IncompleteFrame,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("bad multi-bulk request")]
    BadMultiBulk,

    #[error("bad command name length")]
    BadOpLength,

    #[error("value is not an integer or out of range")]
    NotAnInteger,

    #[error("command '{0}' is not allowed")]
    CommandNotAllowed(String),

    #[error("too many sessions")]
    TooManySessions,

    #[error("router is not online")]
    RouterNotOnline,

    #[error("resp is required")]
    RespIsRequired,

    #[error("session has been closed")]
    SessionClosed,

    #[error("backend failure: {0}")]
    Backend(String),

    /// A backend answered a scatter sub-request with a frame the coalesce
    /// step cannot fold, e.g. a non-array reply to a single-key MGET.
    #[error("{0}")]
    BadBackendReply(String),
}

// Manual Clone because `std::io::Error` is not cloneable; the Arc makes the
// variant cheap to share between a request's reply slot and the session
// teardown path.
impl Clone for PeridotError {
    fn clone(&self) -> Self {
        match self {
            PeridotError::Io(e) => PeridotError::Io(Arc::clone(e)),
            PeridotError::IncompleteFrame => PeridotError::IncompleteFrame,
            PeridotError::Protocol(s) => PeridotError::Protocol(s.clone()),
            PeridotError::BadMultiBulk => PeridotError::BadMultiBulk,
            PeridotError::BadOpLength => PeridotError::BadOpLength,
            PeridotError::NotAnInteger => PeridotError::NotAnInteger,
            PeridotError::CommandNotAllowed(s) => PeridotError::CommandNotAllowed(s.clone()),
            PeridotError::TooManySessions => PeridotError::TooManySessions,
            PeridotError::RouterNotOnline => PeridotError::RouterNotOnline,
            PeridotError::RespIsRequired => PeridotError::RespIsRequired,
            PeridotError::SessionClosed => PeridotError::SessionClosed,
            PeridotError::Backend(s) => PeridotError::Backend(s.clone()),
            PeridotError::BadBackendReply(s) => PeridotError::BadBackendReply(s.clone()),
        }
    }
}

impl From<std::io::Error> for PeridotError {
    fn from(e: std::io::Error) -> Self {
        PeridotError::Io(Arc::new(e))
    }
}
