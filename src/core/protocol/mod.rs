// src/core/protocol/mod.rs

//! The RESP wire protocol: frame model plus the tokio-util codec used by
//! both the client-facing listener and the test harness.

mod resp_frame;

pub use resp_frame::{RespFrame, RespFrameCodec};

use crate::core::PeridotError;

/// Validates a decoded client frame as a command multi-bulk.
///
/// Clients must send commands as arrays of bulk strings. Anything else is a
/// protocol violation at the same severity as a codec failure, so the
/// caller tears the session down rather than answering inline. An empty
/// array passes through: classification answers it before closing.
pub fn into_multi_bulk(frame: RespFrame) -> Result<Vec<RespFrame>, PeridotError> {
    match frame {
        RespFrame::Array(items)
            if items.iter().all(|f| matches!(f, RespFrame::BulkString(_))) =>
        {
            Ok(items)
        }
        _ => Err(PeridotError::BadMultiBulk),
    }
}
