// src/core/storage/record.rs

//! The records a committed mutation leaves behind, and the hook interface through
//! which they leave the store.

use bytes::Bytes;
use std::fmt::Display;

/// One argument of a propagated command.
#[derive(Debug, Clone, PartialEq)]
pub enum CmdArg {
    Bytes(Bytes),
    Text(String),
    Int(i64),
    Uint(u64),
    Float(f64),
    /// Anything else, already rendered with its `Display` implementation.
    Other(String),
}

impl CmdArg {
    pub fn other(value: &impl Display) -> Self {
        CmdArg::Other(value.to_string())
    }
}

impl From<Bytes> for CmdArg {
    fn from(b: Bytes) -> Self {
        CmdArg::Bytes(b)
    }
}

impl From<&Bytes> for CmdArg {
    fn from(b: &Bytes) -> Self {
        CmdArg::Bytes(b.clone())
    }
}

impl From<&str> for CmdArg {
    fn from(s: &str) -> Self {
        CmdArg::Text(s.to_string())
    }
}

impl From<String> for CmdArg {
    fn from(s: String) -> Self {
        CmdArg::Text(s)
    }
}

impl From<i64> for CmdArg {
    fn from(i: i64) -> Self {
        CmdArg::Int(i)
    }
}

impl From<u64> for CmdArg {
    fn from(u: u64) -> Self {
        CmdArg::Uint(u)
    }
}

impl From<u32> for CmdArg {
    fn from(u: u32) -> Self {
        CmdArg::Uint(u64::from(u))
    }
}

impl From<usize> for CmdArg {
    fn from(u: usize) -> Self {
        CmdArg::Uint(u as u64)
    }
}

impl From<f64> for CmdArg {
    fn from(f: f64) -> Self {
        CmdArg::Float(f)
    }
}

/// A committed mutation as seen by post-commit hooks: `op` is an uppercase command name.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandRecord {
    pub db: u32,
    pub op: &'static str,
    pub args: Vec<CmdArg>,
}

impl CommandRecord {
    pub fn new(db: u32, op: &'static str, args: Vec<CmdArg>) -> Self {
        Self { db, op, args }
    }
}

/// Invoked by the store after every committed mutation, while the database lock is
/// still held, so hooks observe records in commit order.
pub trait CommitHook: Send + Sync {
    fn on_commit(&self, record: &CommandRecord);
}

/// Records collected by a single `Store::update` call.
#[derive(Debug, Default)]
pub struct CommitLog {
    entries: Vec<(&'static str, Vec<CmdArg>)>,
}

impl CommitLog {
    pub fn push(&mut self, op: &'static str, args: Vec<CmdArg>) {
        self.entries.push((op, args));
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn into_records(self, db: u32) -> impl Iterator<Item = CommandRecord> {
        self.entries
            .into_iter()
            .map(move |(op, args)| CommandRecord::new(db, op, args))
    }
}
