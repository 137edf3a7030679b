// src/core/commands/generic/info.rs

//! Implements the `INFO` command, which renders server state as `field:value` lines
//! grouped in sections.

use crate::core::commands::command_trait::{ExecutableCommand, ExecutionContext, ParseCommand};
use crate::core::state::ServerState;
use crate::core::{QdbError, RespValue};
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt::Write;
use std::sync::atomic::Ordering;
use strum::IntoEnumIterator;
use strum_macros::{AsRefStr, EnumIter};

/// `INFO` sections in rendering order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, AsRefStr)]
#[strum(serialize_all = "lowercase")]
enum Section {
    Server,
    Clients,
    Stats,
    Replication,
    Keyspace,
}

#[derive(Debug, Clone, Default)]
pub struct Info {
    /// `None` renders every section.
    pub section: Option<String>,
}

impl ParseCommand for Info {
    fn parse(args: &[Bytes]) -> Result<Self, QdbError> {
        match args {
            [] => Ok(Info { section: None }),
            [section] => {
                let section = String::from_utf8_lossy(section).to_ascii_lowercase();
                Ok(Info {
                    section: (section != "all" && section != "default").then_some(section),
                })
            }
            _ => Err(QdbError::SyntaxError),
        }
    }
}

#[async_trait]
impl ExecutableCommand for Info {
    async fn execute<'a>(&self, ctx: &mut ExecutionContext<'a>) -> Result<RespValue, QdbError> {
        let mut out = String::new();
        for section in Section::iter() {
            if self.section.as_deref().is_some_and(|s| s != section.as_ref()) {
                continue;
            }
            if !out.is_empty() {
                out.push_str("\r\n");
            }
            render_section(&ctx.state, section, &mut out)?;
        }
        Ok(RespValue::BulkString(Bytes::from(out)))
    }
}

fn render_section(state: &ServerState, section: Section, out: &mut String) -> Result<(), QdbError> {
    match section {
        Section::Server => render_server(state, out),
        Section::Clients => {
            let _ = writeln!(out, "# Clients\r");
            let _ = writeln!(out, "connected_clients:{}\r", state.clients.len());
        }
        Section::Stats => render_stats(state, out),
        Section::Replication => render_replication(state, out),
        Section::Keyspace => render_keyspace(state, out)?,
    }
    Ok(())
}

fn render_server(state: &ServerState, out: &mut String) {
    let _ = writeln!(out, "# Server\r");
    let _ = writeln!(out, "qdb_version:{}\r", env!("CARGO_PKG_VERSION"));
    let _ = writeln!(out, "process_id:{}\r", std::process::id());
    let _ = writeln!(out, "run_id:{}\r", state.master.run_id());
    let _ = writeln!(out, "tcp_port:{}\r", state.config.port());
    let _ = writeln!(
        out,
        "uptime_in_seconds:{}\r",
        state.started_at.elapsed().as_secs()
    );
}

fn render_stats(state: &ServerState, out: &mut String) {
    let _ = writeln!(out, "# Stats\r");
    let _ = writeln!(
        out,
        "total_connections_received:{}\r",
        state.stats.get_total_connections()
    );
    let _ = writeln!(
        out,
        "total_commands_processed:{}\r",
        state.stats.get_total_commands()
    );
    let _ = writeln!(out, "expired_keys:{}\r", state.stats.get_expired_keys());
    let _ = writeln!(out, "sync_full:{}\r", state.master.sync_full());
    let _ = writeln!(out, "sync_partial_ok:{}\r", state.master.sync_partial_ok());
    let _ = writeln!(out, "sync_partial_err:{}\r", state.master.sync_partial_err());
}

fn render_replication(state: &ServerState, out: &mut String) {
    let master = state.master.report();
    let slave = state.slave.report();

    let _ = writeln!(out, "# Replication\r");
    let role = if slave.master_addr.is_some() {
        "slave"
    } else {
        "master"
    };
    let _ = writeln!(out, "role:{}\r", role);
    let _ = writeln!(
        out,
        "slaveof:{}\r",
        slave.master_addr.as_deref().unwrap_or("")
    );
    if let Some((host, port)) = slave.master_host_port() {
        let _ = writeln!(out, "master_host:{}\r", host);
        let _ = writeln!(out, "master_port:{}\r", port);
        let _ = writeln!(
            out,
            "master_link_status:{}\r",
            if slave.link_up() { "up" } else { "down" }
        );
        let _ = writeln!(out, "master_link_state:{}\r", slave.link);
        let _ = writeln!(out, "master_run_id:{}\r", slave.master_runid);
        let _ = writeln!(out, "slave_repl_offset:{}\r", slave.sync_offset);
        let _ = writeln!(out, "master_sync_since:{}\r", slave.syncing_since);
        let _ = writeln!(out, "sync_total_bytes:{}\r", slave.sync_total_bytes);
        let _ = writeln!(out, "sync_cache_bytes:{}\r", slave.sync_cache_bytes);
    }

    let _ = writeln!(out, "connected_slaves:{}\r", master.slaves.len());
    let mut listed = Vec::with_capacity(master.slaves.len());
    for (index, info) in master.slaves.iter().enumerate() {
        let (ip, port) = info.announced_addr();
        let _ = writeln!(
            out,
            "slave{}:ip={},port={},state={},offset={},ack_time={}\r",
            index,
            ip,
            port,
            info.state(),
            info.ack_offset.load(Ordering::Relaxed),
            info.ack_time.load(Ordering::Relaxed),
        );
        listed.push(format!("{ip}:{port}"));
    }
    let _ = writeln!(out, "slaves:{}\r", listed.join(","));
    let _ = writeln!(out, "master_replid:{}\r", state.master.run_id());
    let _ = writeln!(out, "master_repl_offset:{}\r", master.master_offset);
    let _ = writeln!(
        out,
        "repl_backlog_active:{}\r",
        u8::from(master.backlog_active)
    );
    let _ = writeln!(out, "repl_backlog_size:{}\r", master.backlog_size);
    let _ = writeln!(
        out,
        "repl_backlog_first_byte_offset:{}\r",
        master.first_byte
    );
    let _ = writeln!(out, "repl_backlog_histlen:{}\r", master.histlen);
}

fn render_keyspace(state: &ServerState, out: &mut String) -> Result<(), QdbError> {
    let _ = writeln!(out, "# Keyspace\r");
    for db in 0..state.store.databases() {
        let (keys, expires) = state
            .store
            .read(db, |ks| (ks.len(), ks.expires_count()))?;
        if keys > 0 {
            let _ = writeln!(out, "db{}:keys={},expires={}\r", db, keys, expires);
        }
    }
    Ok(())
}
