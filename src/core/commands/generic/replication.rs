// src/core/commands/generic/replication.rs

//! Replication commands: `SLAVEOF`, `ROLE`, `REPLCONF`, `SYNC` and `PSYNC`.
//!
//! `SYNC` and `PSYNC` take over the connection, so the router turns them into a
//! `RouteResponse::Sync` instead of executing them. `REPLCONF ACK` is answered with
//! nothing at all.

use crate::core::commands::command_trait::{ExecutableCommand, ExecutionContext, ParseCommand};
use crate::core::commands::helpers::{arg_is, extract_string, parse_i64, validate_arg_count};
use crate::core::replication::SyncRequest;
use crate::core::{QdbError, RespValue};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::Ordering;
use tracing::info;

#[derive(Debug, Clone)]
pub struct SlaveOf {
    /// `None` for `SLAVEOF NO ONE`.
    pub target: Option<(String, u16)>,
}

impl ParseCommand for SlaveOf {
    fn parse(args: &[Bytes]) -> Result<Self, QdbError> {
        validate_arg_count(args, 2, "slaveof")?;
        if arg_is(&args[0], "no") && arg_is(&args[1], "one") {
            return Ok(SlaveOf { target: None });
        }
        let host = extract_string(&args[0])?;
        let port = parse_i64(&args[1])?;
        let port = u16::try_from(port)
            .ok()
            .filter(|p| *p > 0)
            .ok_or_else(|| QdbError::InvalidState("invalid master port".into()))?;
        Ok(SlaveOf {
            target: Some((host, port)),
        })
    }
}

#[async_trait]
impl ExecutableCommand for SlaveOf {
    async fn execute<'a>(&self, ctx: &mut ExecutionContext<'a>) -> Result<RespValue, QdbError> {
        let state = ctx.state.clone();
        match &self.target {
            Some((host, port)) => info!("SLAVEOF {}:{} requested", host, port),
            None => info!("SLAVEOF NO ONE requested"),
        }
        state
            .slave
            .slave_of(
                self.target.clone(),
                state.config.port(),
                &state.config.master_auth,
            )
            .await?;
        Ok(RespValue::ok())
    }
}

#[derive(Debug, Clone, Default)]
pub struct Role;

impl ParseCommand for Role {
    fn parse(args: &[Bytes]) -> Result<Self, QdbError> {
        validate_arg_count(args, 0, "role")?;
        Ok(Role)
    }
}

#[async_trait]
impl ExecutableCommand for Role {
    async fn execute<'a>(&self, ctx: &mut ExecutionContext<'a>) -> Result<RespValue, QdbError> {
        let slave = ctx.state.slave.report();
        if let Some((host, port)) = slave.master_host_port() {
            return Ok(RespValue::Array(vec![
                RespValue::BulkString("slave".into()),
                RespValue::BulkString(host.into()),
                RespValue::Integer(i64::from(port)),
                RespValue::BulkString(slave.link.to_string().into()),
                RespValue::Integer(slave.sync_offset),
            ]));
        }

        let master = ctx.state.master.report();
        let slaves = master
            .slaves
            .iter()
            .map(|info| {
                let (ip, port) = info.announced_addr();
                RespValue::Array(vec![
                    RespValue::BulkString(ip.into()),
                    RespValue::BulkString(port.to_string().into()),
                    RespValue::BulkString(
                        info.ack_offset.load(Ordering::Relaxed).to_string().into(),
                    ),
                ])
            })
            .collect();
        Ok(RespValue::Array(vec![
            RespValue::BulkString("master".into()),
            RespValue::Integer(master.master_offset as i64),
            RespValue::Array(slaves),
        ]))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Replconf {
    ListeningPort(u16),
    Ack(i64),
    GetAck,
    /// Options this server accepts and ignores, such as `capa`.
    Other,
}

impl Replconf {
    /// `REPLCONF ACK` is the one command that never produces a reply.
    pub fn is_ack(&self) -> bool {
        matches!(self, Replconf::Ack(_))
    }
}

impl ParseCommand for Replconf {
    fn parse(args: &[Bytes]) -> Result<Self, QdbError> {
        if args.len() % 2 != 0 {
            return Err(QdbError::SyntaxError);
        }
        let Some(option) = args.first() else {
            return Ok(Replconf::Other);
        };
        if arg_is(option, "listening-port") {
            let port = parse_i64(&args[1])?;
            let port = u16::try_from(port).map_err(|_| QdbError::NotAnInteger)?;
            Ok(Replconf::ListeningPort(port))
        } else if arg_is(option, "ack") {
            Ok(Replconf::Ack(parse_i64(&args[1])?))
        } else if arg_is(option, "getack") {
            Ok(Replconf::GetAck)
        } else {
            Ok(Replconf::Other)
        }
    }
}

#[async_trait]
impl ExecutableCommand for Replconf {
    async fn execute<'a>(&self, ctx: &mut ExecutionContext<'a>) -> Result<RespValue, QdbError> {
        match self {
            Replconf::ListeningPort(port) => {
                ctx.session.listening_port = *port;
                Ok(RespValue::ok())
            }
            // The router never executes an ACK.
            Replconf::Ack(_) => Ok(RespValue::Null),
            Replconf::GetAck | Replconf::Other => Ok(RespValue::ok()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Sync;

impl Sync {
    pub fn request(&self) -> SyncRequest {
        SyncRequest::legacy()
    }
}

impl ParseCommand for Sync {
    fn parse(args: &[Bytes]) -> Result<Self, QdbError> {
        validate_arg_count(args, 0, "sync")?;
        Ok(Sync)
    }
}

#[async_trait]
impl ExecutableCommand for Sync {
    async fn execute<'a>(&self, _ctx: &mut ExecutionContext<'a>) -> Result<RespValue, QdbError> {
        Err(QdbError::InvalidState(
            "SYNC is only valid on a client connection".into(),
        ))
    }
}

#[derive(Debug, Clone)]
pub struct Psync {
    pub runid: String,
    pub offset: i64,
}

impl Psync {
    pub fn request(&self) -> SyncRequest {
        SyncRequest::psync(self.runid.clone(), self.offset)
    }
}

impl ParseCommand for Psync {
    fn parse(args: &[Bytes]) -> Result<Self, QdbError> {
        validate_arg_count(args, 2, "psync")?;
        Ok(Psync {
            runid: extract_string(&args[0])?,
            offset: parse_i64(&args[1])?,
        })
    }
}

#[async_trait]
impl ExecutableCommand for Psync {
    async fn execute<'a>(&self, _ctx: &mut ExecutionContext<'a>) -> Result<RespValue, QdbError> {
        Err(QdbError::InvalidState(
            "PSYNC is only valid on a client connection".into(),
        ))
    }
}
