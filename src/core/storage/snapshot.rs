// src/core/storage/snapshot.rs

//! A point-in-time view of every database, consumed in batches by the RDB encoder.
//!
//! Capturing only copies key handles and value pointers. Values are materialized into
//! `SnapshotObject`s by `load_obj_cron`, off the pause.

use super::data_types::StoredValue;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One key of a snapshot, tagged with the database it came from.
#[derive(Debug, Clone)]
pub struct SnapshotObject {
    pub db: u32,
    pub key: Bytes,
    pub value: StoredValue,
}

#[derive(Debug)]
pub struct Snapshot {
    /// Shared entries of each database, in database order.
    dbs: VecDeque<(u32, std::vec::IntoIter<(Bytes, Arc<StoredValue>)>)>,
    remaining: usize,
    total: usize,
}

impl Snapshot {
    pub(crate) fn new(dbs: Vec<(u32, Vec<(Bytes, Arc<StoredValue>)>)>) -> Self {
        let total = dbs.iter().map(|(_, entries)| entries.len()).sum();
        Self {
            dbs: dbs
                .into_iter()
                .filter(|(_, entries)| !entries.is_empty())
                .map(|(db, entries)| (db, entries.into_iter()))
                .collect(),
            remaining: total,
            total,
        }
    }

    fn next_object(&mut self) -> Option<SnapshotObject> {
        loop {
            let (db, entries) = self.dbs.front_mut()?;
            if let Some((key, value)) = entries.next() {
                self.remaining -= 1;
                return Some(SnapshotObject {
                    db: *db,
                    key,
                    value: Arc::unwrap_or_clone(value),
                });
            }
            self.dbs.pop_front();
        }
    }

    /// Number of objects captured when the snapshot was taken.
    pub fn total(&self) -> usize {
        self.total
    }

    pub fn remaining(&self) -> usize {
        self.remaining
    }

    /// Hands out up to `parallelism * batch` objects, stopping early once `tick` has
    /// elapsed. The flag tells whether objects remain after this call.
    pub fn load_obj_cron(
        &mut self,
        tick: Duration,
        parallelism: usize,
        batch: usize,
    ) -> (Vec<SnapshotObject>, bool) {
        let limit = parallelism.max(1) * batch.max(1);
        let started = Instant::now();
        let mut out = Vec::with_capacity(limit.min(self.remaining));
        while out.len() < limit {
            let Some(obj) = self.next_object() else {
                break;
            };
            out.push(obj);
            if out.len() % batch.max(1) == 0 && started.elapsed() >= tick {
                break;
            }
        }
        let more = self.remaining > 0;
        (out, more)
    }
}
