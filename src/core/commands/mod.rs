// src/core/commands/mod.rs

//! This module defines all supported commands, organizes them into categories,
//! and provides the central `Command` enum that encapsulates their parsed state.
//! The `define_commands!` macro generates the enum, its dispatch and the static
//! command table used by the router.

use crate::core::commands::command_trait::{
    CommandExt, CommandFlags, ExecutableCommand, ExecutionContext, ParseCommand,
};
use crate::core::{QdbError, RespValue};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use std::collections::HashMap;

pub use command_spec::CommandSpec;

#[macro_use]
mod command_def;

pub mod command_spec;
pub mod command_trait;
pub mod generic;
pub mod hash;
pub mod helpers;
pub mod list;
pub mod string;

define_commands! {
    // --- Connection & server ---
    (Ping, generic, "ping", -1, CommandFlags::READONLY),
    (Echo, generic, "echo", 2, CommandFlags::READONLY),
    (Auth, generic, "auth", 2, CommandFlags::NO_AUTH),
    (Select, generic, "select", 2, CommandFlags::READONLY),
    (Info, generic, "info", -1, CommandFlags::READONLY),
    (Shutdown, generic, "shutdown", -1, CommandFlags::ADMIN),
    (Bgsave, generic, "bgsave", 1, CommandFlags::ADMIN),
    (BgsaveTo, generic, "bgsaveto", 2, CommandFlags::ADMIN),

    // --- Keyspace ---
    (Del, generic, "del", -2, CommandFlags::WRITE),
    (Exists, generic, "exists", -2, CommandFlags::READONLY),
    (DbSize, generic, "dbsize", 1, CommandFlags::READONLY),
    (FlushAll, generic, "flushall", -1, CommandFlags::WRITE),
    (Expire, generic, "expire", 3, CommandFlags::WRITE),
    (PExpire, generic, "pexpire", 3, CommandFlags::WRITE),
    (PExpireAt, generic, "pexpireat", 3, CommandFlags::WRITE),
    (Ttl, generic, "ttl", 2, CommandFlags::READONLY),
    (Pttl, generic, "pttl", 2, CommandFlags::READONLY),

    // --- Replication ---
    (SlaveOf, generic, "slaveof", 3, CommandFlags::ADMIN),
    (Role, generic, "role", 1, CommandFlags::READONLY),
    (Replconf, generic, "replconf", -1, CommandFlags::ADMIN),
    (Sync, generic, "sync", 1, CommandFlags::ADMIN),
    (Psync, generic, "psync", 3, CommandFlags::ADMIN),

    // --- Strings ---
    (Get, string, "get", 2, CommandFlags::READONLY),
    (Set, string, "set", -3, CommandFlags::WRITE),
    (Incr, string, "incr", 2, CommandFlags::WRITE),
    (Decr, string, "decr", 2, CommandFlags::WRITE),
    (IncrBy, string, "incrby", 3, CommandFlags::WRITE),

    // --- Hashes ---
    (HSet, hash, "hset", -4, CommandFlags::WRITE),
    (HGet, hash, "hget", 3, CommandFlags::READONLY),
    (HGetAll, hash, "hgetall", 2, CommandFlags::READONLY),
    (HDel, hash, "hdel", -3, CommandFlags::WRITE),

    // --- Lists ---
    (LPush, list, "lpush", -3, CommandFlags::WRITE),
    (RPush, list, "rpush", -3, CommandFlags::WRITE),
    (LRange, list, "lrange", 4, CommandFlags::READONLY),
}

static COMMAND_TABLE: Lazy<HashMap<&'static str, CommandSpec>> = Lazy::new(build_command_table);

/// Looks up a command by name, case-insensitively.
pub fn lookup(name: &[u8]) -> Option<&'static CommandSpec> {
    let name = std::str::from_utf8(name).ok()?.to_ascii_lowercase();
    COMMAND_TABLE.get(name.as_str())
}

/// Number of registered commands.
pub fn command_count() -> usize {
    COMMAND_TABLE.len()
}
