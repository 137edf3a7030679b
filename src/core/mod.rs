// src/core/mod.rs

//! The central module containing the core logic and data structures of QDB.

pub mod commands;
pub mod errors;
pub mod handler;
pub mod metrics;
pub mod persistence;
pub mod protocol;
pub mod replication;
pub mod state;
pub mod storage;

pub use commands::Command;
pub use errors::QdbError;
pub use protocol::RespValue;
