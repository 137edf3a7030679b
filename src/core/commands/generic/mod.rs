// src/core/commands/generic/mod.rs

//! Connection, keyspace, server and replication commands.

mod auth;
mod bgsave;
mod expire;
mod info;
mod keys;
mod ping;
mod replication;
mod shutdown;

pub use auth::{Auth, Select};
pub use bgsave::{Bgsave, BgsaveTo};
pub use expire::{Expire, PExpire, PExpireAt, Pttl, Ttl};
pub use info::Info;
pub use keys::{DbSize, Del, Exists, FlushAll};
pub use ping::{Echo, Ping};
pub use replication::{Psync, Replconf, Role, SlaveOf, Sync};
pub use shutdown::Shutdown;
