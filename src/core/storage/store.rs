// src/core/storage/store.rs

//! The transactional key/value store shared by every connection.
//!
//! Each logical database is guarded by its own readers-writer lock. A global pause
//! gate sits in front of all of them: every write holds it shared, and taking a
//! snapshot holds it exclusively, which quiesces all writers for the short moment the
//! snapshot callback and the pointer copy of every keyspace need.

use super::data_types::{DataValue, StoredValue};
use super::keyspace::Keyspace;
use super::record::{CommandRecord, CommitHook, CommitLog};
use super::snapshot::Snapshot;
use super::unix_millis;
use crate::core::QdbError;
use bytes::Bytes;
use parking_lot::RwLock;
use std::sync::Arc;

pub struct Store {
    dbs: Vec<RwLock<Keyspace>>,
    pause: RwLock<()>,
    hooks: RwLock<Vec<Arc<dyn CommitHook>>>,
}

impl Store {
    /// Creates a store with `databases` empty logical databases.
    pub fn new(databases: usize) -> Self {
        Self {
            dbs: (0..databases).map(|_| RwLock::new(Keyspace::new())).collect(),
            pause: RwLock::new(()),
            hooks: RwLock::new(Vec::new()),
        }
    }

    pub fn databases(&self) -> usize {
        self.dbs.len()
    }

    /// Registers a post-commit hook. Hooks are installed during startup.
    pub fn add_hook(&self, hook: Arc<dyn CommitHook>) {
        self.hooks.write().push(hook);
    }

    fn db(&self, db: usize) -> Result<&RwLock<Keyspace>, QdbError> {
        self.dbs.get(db).ok_or(QdbError::InvalidDbIndex)
    }

    /// Runs a read-only closure against database `db`.
    pub fn read<T>(&self, db: usize, f: impl FnOnce(&Keyspace) -> T) -> Result<T, QdbError> {
        let keyspace = self.db(db)?.read();
        Ok(f(&keyspace))
    }

    /// Runs a mutation against database `db`.
    ///
    /// Records pushed to the `CommitLog` are handed to every hook after `f` succeeds,
    /// while the database lock is still held. A failed mutation publishes nothing.
    pub fn update<T>(
        &self,
        db: usize,
        f: impl FnOnce(&mut Keyspace, &mut CommitLog) -> Result<T, QdbError>,
    ) -> Result<T, QdbError> {
        let _gate = self.pause.read();
        let mut keyspace = self.db(db)?.write();
        let mut log = CommitLog::default();
        let out = f(&mut keyspace, &mut log)?;
        self.publish(db as u32, log);
        Ok(out)
    }

    fn publish(&self, db: u32, log: CommitLog) {
        if log.is_empty() {
            return;
        }
        let hooks = self.hooks.read();
        for record in log.into_records(db) {
            for hook in hooks.iter() {
                hook.on_commit(&record);
            }
        }
    }

    /// The slot-restore write used by loaders: replaces `key` without publishing a record.
    /// `ttl_ms` is relative to now.
    pub fn restore(
        &self,
        db: usize,
        key: Bytes,
        value: DataValue,
        ttl_ms: Option<u64>,
    ) -> Result<(), QdbError> {
        let _gate = self.pause.read();
        let mut keyspace = self.db(db)?.write();
        let expire_at = ttl_ms.map(|ttl| unix_millis().saturating_add(ttl));
        keyspace.insert(key, StoredValue::with_expiry(value, expire_at));
        Ok(())
    }

    /// Clears every database. When `propagate` is set a `FLUSHALL` record is published.
    pub fn flush_all(&self, propagate: bool) {
        let _gate = self.pause.read();
        let mut guards: Vec<_> = self.dbs.iter().map(|db| db.write()).collect();
        for keyspace in guards.iter_mut() {
            keyspace.clear();
        }
        if propagate {
            let hooks = self.hooks.read();
            let record = CommandRecord::new(0, "FLUSHALL", Vec::new());
            for hook in hooks.iter() {
                hook.on_commit(&record);
            }
        }
    }

    /// Pauses every writer, runs `on_pause`, and captures a point-in-time view of all
    /// databases before letting writers continue. Values are shared with the live
    /// keyspaces, not copied.
    pub fn new_snapshot<R>(&self, on_pause: impl FnOnce() -> R) -> (Snapshot, R) {
        let _gate = self.pause.write();
        let result = on_pause();
        let dbs = self
            .dbs
            .iter()
            .enumerate()
            .map(|(index, db)| (index as u32, db.read().share_entries()))
            .collect();
        (Snapshot::new(dbs), result)
    }

    /// Number of live keys in database `db`.
    pub fn dbsize(&self, db: usize) -> Result<usize, QdbError> {
        let now = unix_millis();
        self.read(db, |ks| ks.iter().filter(|(_, v)| !v.is_expired(now)).count())
    }
}
