// src/core/commands/helpers.rs

//! Small argument-parsing helpers shared by the session's command handlers.

use crate::core::PeridotError;
use crate::core::protocol::RespFrame;
use bytes::Bytes;

/// Parses a signed decimal integer out of a raw argument.
pub fn btoi64(value: &[u8]) -> Result<i64, PeridotError> {
    std::str::from_utf8(value)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or(PeridotError::NotAnInteger)
}

/// The raw bytes of argument `index` (0 is the command name itself).
///
/// The reader validates every element as a bulk string before a Request is
/// built, so a miss here means the index is out of range.
pub fn arg_bytes(multi: &[RespFrame], index: usize) -> Option<&Bytes> {
    match multi.get(index) {
        Some(RespFrame::BulkString(b)) => Some(b),
        _ => None,
    }
}

/// Argument `index` rendered as a lossy string, for addresses and
/// diagnostics.
pub fn arg_string(multi: &[RespFrame], index: usize) -> Option<String> {
    arg_bytes(multi, index).map(|b| String::from_utf8_lossy(b).into_owned())
}
