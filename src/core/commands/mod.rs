// src/core/commands/mod.rs

//! Command classification: maps an inbound multi-bulk to an uppercase
//! command name plus capability flags, without parsing the command itself.
//! The proxy forwards most commands verbatim; the flags exist so the
//! session can refuse the handful whose semantics cannot survive sharding.

pub mod helpers;

use crate::core::PeridotError;
use crate::core::protocol::RespFrame;
use bitflags::bitflags;
use lazy_static::lazy_static;
use std::collections::HashMap;

/// Commands longer than this are rejected outright.
const MAX_OP_LEN: usize = 64;

bitflags! {
    /// Capability flags describing how the proxy may treat a command.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct OpFlag: u32 {
        /// The command mutates the keyspace.
        const WRITE       = 1 << 0;
        /// Unknown or opaque command: assume it may write.
        const MAY_WRITE   = 1 << 1;
        /// The command must run on a slot's master backend.
        const MASTER_ONLY = 1 << 2;
        /// The command is refused by the proxy.
        const NOT_ALLOWED = 1 << 3;
    }
}

impl OpFlag {
    pub fn is_not_allowed(&self) -> bool {
        self.contains(OpFlag::NOT_ALLOWED)
    }

    pub fn is_read_only(&self) -> bool {
        !self.intersects(OpFlag::WRITE | OpFlag::MAY_WRITE)
    }
}

/// Classifies a decoded multi-bulk.
///
/// Returns the uppercased command name and its flags. Commands absent from
/// the table (including names containing non-alphabetic bytes) are passed
/// through with `MAY_WRITE` so the backend can decide whether it knows
/// them.
pub fn get_op_info(multi: &[RespFrame]) -> Result<(String, OpFlag), PeridotError> {
    let Some(RespFrame::BulkString(op)) = multi.first() else {
        return Err(PeridotError::BadMultiBulk);
    };
    if op.is_empty() || op.len() > MAX_OP_LEN {
        return Err(PeridotError::BadOpLength);
    }
    let name = String::from_utf8_lossy(op).to_ascii_uppercase();
    if !op.iter().all(|b| b.is_ascii_alphabetic()) {
        return Ok((name, OpFlag::MAY_WRITE));
    }
    match OP_TABLE.get(name.as_str()) {
        Some(flag) => Ok((name, *flag)),
        None => Ok((name, OpFlag::MAY_WRITE)),
    }
}

lazy_static! {
    static ref OP_TABLE: HashMap<&'static str, OpFlag> = {
        let write = OpFlag::WRITE;
        let read = OpFlag::empty();
        let refuse = OpFlag::NOT_ALLOWED;
        let master = OpFlag::WRITE | OpFlag::MASTER_ONLY;

        let entries: &[(&'static str, OpFlag)] = &[
            // Connection and introspection, handled by the session itself.
            ("AUTH", read),
            ("ECHO", read),
            ("INFO", read),
            ("PING", read),
            ("QUIT", read),
            ("SELECT", read),
            // Strings.
            ("APPEND", write),
            ("BITCOUNT", read),
            ("BITPOS", read),
            ("DECR", write),
            ("DECRBY", write),
            ("GET", read),
            ("GETBIT", read),
            ("GETRANGE", read),
            ("GETSET", write),
            ("INCR", write),
            ("INCRBY", write),
            ("INCRBYFLOAT", write),
            ("MGET", read),
            ("MSET", write),
            ("PSETEX", write),
            ("SET", write),
            ("SETBIT", write),
            ("SETEX", write),
            ("SETNX", write),
            ("SETRANGE", write),
            ("STRLEN", read),
            ("SUBSTR", read),
            // Generic keyspace.
            ("DEL", write),
            ("DUMP", read),
            ("EXISTS", read),
            ("EXPIRE", write),
            ("EXPIREAT", write),
            ("PERSIST", write),
            ("PEXPIRE", write),
            ("PEXPIREAT", write),
            ("PTTL", read),
            ("SORT", write),
            ("TTL", read),
            ("TYPE", read),
            // Hashes.
            ("HDEL", write),
            ("HEXISTS", read),
            ("HGET", read),
            ("HGETALL", read),
            ("HINCRBY", write),
            ("HINCRBYFLOAT", write),
            ("HKEYS", read),
            ("HLEN", read),
            ("HMGET", read),
            ("HMSET", write),
            ("HSCAN", read),
            ("HSET", write),
            ("HSETNX", write),
            ("HVALS", read),
            // Lists.
            ("LINDEX", read),
            ("LINSERT", write),
            ("LLEN", read),
            ("LPOP", write),
            ("LPUSH", write),
            ("LPUSHX", write),
            ("LRANGE", read),
            ("LREM", write),
            ("LSET", write),
            ("LTRIM", write),
            ("RPOP", write),
            ("RPOPLPUSH", write),
            ("RPUSH", write),
            ("RPUSHX", write),
            // Sets.
            ("SADD", write),
            ("SCARD", read),
            ("SDIFF", read),
            ("SDIFFSTORE", write),
            ("SINTER", read),
            ("SINTERSTORE", write),
            ("SISMEMBER", read),
            ("SMEMBERS", read),
            ("SMOVE", write),
            ("SPOP", write),
            ("SRANDMEMBER", read),
            ("SREM", write),
            ("SSCAN", read),
            ("SUNION", read),
            ("SUNIONSTORE", write),
            // Sorted sets.
            ("ZADD", write),
            ("ZCARD", read),
            ("ZCOUNT", read),
            ("ZINCRBY", write),
            ("ZLEXCOUNT", read),
            ("ZRANGE", read),
            ("ZRANGEBYLEX", read),
            ("ZRANGEBYSCORE", read),
            ("ZRANK", read),
            ("ZREM", write),
            ("ZREMRANGEBYLEX", write),
            ("ZREMRANGEBYRANK", write),
            ("ZREMRANGEBYSCORE", write),
            ("ZREVRANGE", read),
            ("ZREVRANGEBYLEX", read),
            ("ZREVRANGEBYSCORE", read),
            ("ZREVRANK", read),
            ("ZSCAN", read),
            ("ZSCORE", read),
            // HyperLogLog.
            ("PFADD", write),
            ("PFCOUNT", read),
            ("PFMERGE", write),
            // Scripting is forwarded; the backend owns the sandbox.
            ("EVAL", write),
            ("EVALSHA", write),
            // Slot management surface of the sharded backend.
            ("SLOTSDEL", master),
            ("SLOTSHASHKEY", read),
            ("SLOTSINFO", OpFlag::MASTER_ONLY),
            ("SLOTSMAPPING", read),
            ("SLOTSMGRTONE", master),
            ("SLOTSMGRTSLOT", master),
            ("SLOTSMGRTTAGONE", master),
            ("SLOTSMGRTTAGSLOT", master),
            ("SLOTSRESTORE", master),
            ("SLOTSSCAN", read),
            // Cross-key operations whose inputs may live on different
            // backends.
            ("BITOP", refuse),
            ("MSETNX", refuse),
            ("RENAME", refuse),
            ("RENAMENX", refuse),
            ("SMEMBERSMOVE", refuse),
            // Whole-keyspace scans.
            ("KEYS", refuse),
            ("RANDOMKEY", refuse),
            ("SCAN", refuse),
            // Blocking operations would pin a backend connection.
            ("BLPOP", refuse),
            ("BRPOP", refuse),
            ("BRPOPLPUSH", refuse),
            // Pub/sub and transactions need a stable server.
            ("DISCARD", refuse),
            ("EXEC", refuse),
            ("MULTI", refuse),
            ("PSUBSCRIBE", refuse),
            ("PUBLISH", refuse),
            ("PUBSUB", refuse),
            ("PUNSUBSCRIBE", refuse),
            ("SUBSCRIBE", refuse),
            ("UNSUBSCRIBE", refuse),
            ("UNWATCH", refuse),
            ("WATCH", refuse),
            // Administration of individual backends.
            ("BGREWRITEAOF", refuse),
            ("BGSAVE", refuse),
            ("CLIENT", refuse),
            ("CONFIG", refuse),
            ("DBSIZE", refuse),
            ("DEBUG", refuse),
            ("FLUSHALL", refuse),
            ("FLUSHDB", refuse),
            ("LASTSAVE", refuse),
            ("MIGRATE", refuse),
            ("MONITOR", refuse),
            ("MOVE", refuse),
            ("OBJECT", refuse),
            ("RESTORE", refuse),
            ("SAVE", refuse),
            ("SCRIPT", refuse),
            ("SHUTDOWN", refuse),
            ("SLAVEOF", refuse),
            ("SLOWLOG", refuse),
            ("SYNC", refuse),
            ("TIME", refuse),
        ];
        entries.iter().copied().collect()
    };
}
