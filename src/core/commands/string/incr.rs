// src/core/commands/string/incr.rs

//! `INCR`, `DECR` and `INCRBY`, all built on one integer-update routine.

use crate::core::commands::command_trait::{ExecutableCommand, ExecutionContext, ParseCommand};
use crate::core::commands::helpers::{parse_i64, validate_arg_count};
use crate::core::storage::{CmdArg, DataValue, StoredValue, unix_millis};
use crate::core::{QdbError, RespValue};
use async_trait::async_trait;
use bytes::Bytes;

#[derive(Debug, Clone)]
pub struct Incr {
    pub key: Bytes,
}

#[derive(Debug, Clone)]
pub struct Decr {
    pub key: Bytes,
}

#[derive(Debug, Clone)]
pub struct IncrBy {
    pub key: Bytes,
    pub delta: i64,
}

impl ParseCommand for Incr {
    fn parse(args: &[Bytes]) -> Result<Self, QdbError> {
        validate_arg_count(args, 1, "incr")?;
        Ok(Incr {
            key: args[0].clone(),
        })
    }
}

impl ParseCommand for Decr {
    fn parse(args: &[Bytes]) -> Result<Self, QdbError> {
        validate_arg_count(args, 1, "decr")?;
        Ok(Decr {
            key: args[0].clone(),
        })
    }
}

impl ParseCommand for IncrBy {
    fn parse(args: &[Bytes]) -> Result<Self, QdbError> {
        validate_arg_count(args, 2, "incrby")?;
        Ok(IncrBy {
            key: args[0].clone(),
            delta: parse_i64(&args[1])?,
        })
    }
}

#[async_trait]
impl ExecutableCommand for Incr {
    async fn execute<'a>(&self, ctx: &mut ExecutionContext<'a>) -> Result<RespValue, QdbError> {
        apply_delta(ctx, &self.key, 1, "INCR", None)
    }
}

#[async_trait]
impl ExecutableCommand for Decr {
    async fn execute<'a>(&self, ctx: &mut ExecutionContext<'a>) -> Result<RespValue, QdbError> {
        apply_delta(ctx, &self.key, -1, "DECR", None)
    }
}

#[async_trait]
impl ExecutableCommand for IncrBy {
    async fn execute<'a>(&self, ctx: &mut ExecutionContext<'a>) -> Result<RespValue, QdbError> {
        apply_delta(ctx, &self.key, self.delta, "INCRBY", Some(self.delta))
    }
}

/// Adds `delta` to the integer stored at `key`, creating it at 0. The record is
/// published as executed so slaves replay the same arithmetic.
fn apply_delta(
    ctx: &ExecutionContext<'_>,
    key: &Bytes,
    delta: i64,
    op: &'static str,
    record_delta: Option<i64>,
) -> Result<RespValue, QdbError> {
    let now = unix_millis();
    ctx.state.store.update(ctx.db(), |ks, log| {
        let (current, expire_at) = match ks.get_mut(key, now) {
            Some(entry) => match &entry.data {
                DataValue::String(raw) => {
                    let n = std::str::from_utf8(raw)
                        .ok()
                        .and_then(|s| s.parse::<i64>().ok())
                        .ok_or(QdbError::NotAnInteger)?;
                    (n, entry.expire_at)
                }
                _ => return Err(QdbError::WrongType),
            },
            None => (0, None),
        };
        let next = current.checked_add(delta).ok_or(QdbError::Overflow)?;

        let mut buf = itoa::Buffer::new();
        let rendered = Bytes::copy_from_slice(buf.format(next).as_bytes());
        ks.insert(
            key.clone(),
            StoredValue::with_expiry(DataValue::String(rendered), expire_at),
        );

        let mut args = vec![CmdArg::from(key)];
        if let Some(d) = record_delta {
            args.push(CmdArg::from(d));
        }
        log.push(op, args);
        Ok(RespValue::Integer(next))
    })
}
