// src/core/replication/fanout.rs

//! The post-commit hook that turns committed mutations into replication-stream bytes.

use super::master::ReplicationMaster;
use crate::core::storage::{CmdArg, CommandRecord, CommitHook};
use std::sync::Weak;

/// Appends `*<n>\r\n` followed by one bulk string per part.
pub fn encode_command(buf: &mut Vec<u8>, op: &str, args: &[CmdArg]) {
    write_header(buf, b'*', (args.len() + 1) as u64);
    write_bulk(buf, op.as_bytes());
    for arg in args {
        match arg {
            CmdArg::Bytes(b) => write_bulk(buf, b),
            CmdArg::Text(s) | CmdArg::Other(s) => write_bulk(buf, s.as_bytes()),
            CmdArg::Int(i) => write_bulk(buf, itoa::Buffer::new().format(*i).as_bytes()),
            CmdArg::Uint(u) => write_bulk(buf, itoa::Buffer::new().format(*u).as_bytes()),
            CmdArg::Float(f) => write_bulk(buf, format_float(*f).as_bytes()),
        }
    }
}

/// Encodes `SELECT <db>`.
pub fn encode_select(buf: &mut Vec<u8>, db: u32) {
    encode_command(buf, "SELECT", &[CmdArg::Uint(u64::from(db))]);
}

fn write_header(buf: &mut Vec<u8>, prefix: u8, len: u64) {
    buf.push(prefix);
    buf.extend_from_slice(itoa::Buffer::new().format(len).as_bytes());
    buf.extend_from_slice(b"\r\n");
}

fn write_bulk(buf: &mut Vec<u8>, data: &[u8]) {
    write_header(buf, b'$', data.len() as u64);
    buf.extend_from_slice(data);
    buf.extend_from_slice(b"\r\n");
}

/// Integral floats are written without a fraction so `1.0` replays as `1`.
fn format_float(f: f64) -> String {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 {
        itoa::Buffer::new().format(f as i64).to_string()
    } else {
        ryu::Buffer::new().format(f).to_string()
    }
}

/// Registered with the store; forwards every committed record to the master engine.
pub struct ReplicationFeedHook {
    master: Weak<ReplicationMaster>,
}

impl ReplicationFeedHook {
    pub fn new(master: Weak<ReplicationMaster>) -> Self {
        Self { master }
    }
}

impl CommitHook for ReplicationFeedHook {
    fn on_commit(&self, record: &CommandRecord) {
        if let Some(master) = self.master.upgrade() {
            master.feed(record.db, record.op, &record.args);
        }
    }
}
