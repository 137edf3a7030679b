// src/core/storage/keyspace.rs

//! A single logical database. Expired entries stay in the map until touched by a
//! write or removed by the sweeper, but they are never visible to readers.
//!
//! Values are reference counted so a snapshot can share them with the live map.
//! A write to a value still held by a snapshot copies it first.

use super::data_types::StoredValue;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Default, Clone)]
pub struct Keyspace {
    entries: HashMap<Bytes, Arc<StoredValue>>,
}

impl Keyspace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the live value for `key`.
    pub fn get(&self, key: &[u8], now_ms: u64) -> Option<&StoredValue> {
        self.entries
            .get(key)
            .map(Arc::as_ref)
            .filter(|v| !v.is_expired(now_ms))
    }

    /// Returns the live value for `key` mutably, dropping it first if it has expired.
    pub fn get_mut(&mut self, key: &[u8], now_ms: u64) -> Option<&mut StoredValue> {
        if self.entries.get(key).is_some_and(|v| v.is_expired(now_ms)) {
            self.entries.remove(key);
            return None;
        }
        self.entries.get_mut(key).map(Arc::make_mut)
    }

    pub fn insert(&mut self, key: Bytes, value: StoredValue) -> Option<StoredValue> {
        self.entries
            .insert(key, Arc::new(value))
            .map(Arc::unwrap_or_clone)
    }

    /// Removes `key`, returning the value only if it was still live.
    pub fn remove(&mut self, key: &[u8], now_ms: u64) -> Option<StoredValue> {
        self.entries
            .remove(key)
            .filter(|v| !v.is_expired(now_ms))
            .map(Arc::unwrap_or_clone)
    }

    /// Removes `key` whether or not it has expired.
    pub fn purge(&mut self, key: &[u8]) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn contains(&self, key: &[u8], now_ms: u64) -> bool {
        self.get(key, now_ms).is_some()
    }

    /// Number of stored entries, including expired ones that have not been swept yet.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries carrying an expiry.
    pub fn expires_count(&self) -> usize {
        self.entries.values().filter(|v| v.expire_at.is_some()).count()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Bytes, &StoredValue)> {
        self.entries.iter().map(|(k, v)| (k, v.as_ref()))
    }

    /// Pointer copies of every entry, for a snapshot taken while writers are paused.
    pub(crate) fn share_entries(&self) -> Vec<(Bytes, Arc<StoredValue>)> {
        self.entries
            .iter()
            .map(|(k, v)| (k.clone(), Arc::clone(v)))
            .collect()
    }

    /// Collects up to `limit` keys whose expiry has passed.
    pub fn expired_keys(&self, now_ms: u64, limit: usize) -> Vec<Bytes> {
        self.entries
            .iter()
            .filter(|(_, v)| v.is_expired(now_ms))
            .map(|(k, _)| k.clone())
            .take(limit)
            .collect()
    }
}
