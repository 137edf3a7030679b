// src/core/storage/data_types.rs

//! Defines the core data structures for storing values in the database,
//! such as `StoredValue` and the `DataValue` enum.

use bytes::Bytes;
use indexmap::IndexMap;
use std::collections::VecDeque;

/// A hard limit on the size of a single string value.
pub const MAX_STRING_SIZE: usize = 512 * 1024 * 1024; // 512MB

/// The data a key can hold.
#[derive(Debug, Clone, PartialEq)]
pub enum DataValue {
    String(Bytes),
    List(VecDeque<Bytes>),
    /// Field order is insertion order, so a dump replays into an identical iteration order.
    Hash(IndexMap<Bytes, Bytes>),
}

impl DataValue {
    /// The name reported by `TYPE`-style introspection and `WRONGTYPE` diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            DataValue::String(_) => "string",
            DataValue::List(_) => "list",
            DataValue::Hash(_) => "hash",
        }
    }
}

/// A value together with its optional absolute expiry (unix milliseconds).
#[derive(Debug, Clone, PartialEq)]
pub struct StoredValue {
    pub data: DataValue,
    pub expire_at: Option<u64>,
}

impl StoredValue {
    pub fn new(data: DataValue) -> Self {
        Self {
            data,
            expire_at: None,
        }
    }

    pub fn with_expiry(data: DataValue, expire_at: Option<u64>) -> Self {
        Self { data, expire_at }
    }

    /// Checks if the value has expired at `now_ms`.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.expire_at.is_some_and(|at| at <= now_ms)
    }
}
