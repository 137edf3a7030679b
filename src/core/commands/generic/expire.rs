// src/core/commands/generic/expire.rs

//! Expiration commands. Every variant resolves to an absolute unix-millisecond
//! deadline before touching the store, and propagates that deadline as `PEXPIREAT`.

use crate::core::commands::command_trait::{ExecutableCommand, ExecutionContext, ParseCommand};
use crate::core::commands::helpers::{absolute_expiry, parse_i64, validate_arg_count};
use crate::core::storage::{CmdArg, unix_millis};
use crate::core::{QdbError, RespValue};
use async_trait::async_trait;
use bytes::Bytes;

#[derive(Debug, Clone)]
pub struct Expire {
    pub key: Bytes,
    pub seconds: i64,
}

#[derive(Debug, Clone)]
pub struct PExpire {
    pub key: Bytes,
    pub millis: i64,
}

#[derive(Debug, Clone)]
pub struct PExpireAt {
    pub key: Bytes,
    pub unix_ms: i64,
}

impl ParseCommand for Expire {
    fn parse(args: &[Bytes]) -> Result<Self, QdbError> {
        validate_arg_count(args, 2, "expire")?;
        Ok(Expire {
            key: args[0].clone(),
            seconds: parse_i64(&args[1])?,
        })
    }
}

impl ParseCommand for PExpire {
    fn parse(args: &[Bytes]) -> Result<Self, QdbError> {
        validate_arg_count(args, 2, "pexpire")?;
        Ok(PExpire {
            key: args[0].clone(),
            millis: parse_i64(&args[1])?,
        })
    }
}

impl ParseCommand for PExpireAt {
    fn parse(args: &[Bytes]) -> Result<Self, QdbError> {
        validate_arg_count(args, 2, "pexpireat")?;
        Ok(PExpireAt {
            key: args[0].clone(),
            unix_ms: parse_i64(&args[1])?,
        })
    }
}

#[async_trait]
impl ExecutableCommand for Expire {
    async fn execute<'a>(&self, ctx: &mut ExecutionContext<'a>) -> Result<RespValue, QdbError> {
        let now = unix_millis();
        let deadline = absolute_expiry(self.seconds, 1000, now)?;
        expire_at(ctx, &self.key, deadline, now)
    }
}

#[async_trait]
impl ExecutableCommand for PExpire {
    async fn execute<'a>(&self, ctx: &mut ExecutionContext<'a>) -> Result<RespValue, QdbError> {
        let now = unix_millis();
        let deadline = absolute_expiry(self.millis, 1, now)?;
        expire_at(ctx, &self.key, deadline, now)
    }
}

#[async_trait]
impl ExecutableCommand for PExpireAt {
    async fn execute<'a>(&self, ctx: &mut ExecutionContext<'a>) -> Result<RespValue, QdbError> {
        expire_at(ctx, &self.key, self.unix_ms.max(0) as u64, unix_millis())
    }
}

/// Sets the deadline of a live key. A deadline that has already passed deletes the
/// key and propagates a `DEL` instead.
fn expire_at(
    ctx: &ExecutionContext<'_>,
    key: &Bytes,
    deadline: u64,
    now: u64,
) -> Result<RespValue, QdbError> {
    ctx.state.store.update(ctx.db(), |ks, log| {
        if deadline <= now {
            if ks.remove(key, now).is_none() {
                return Ok(RespValue::Integer(0));
            }
            log.push("DEL", vec![CmdArg::from(key)]);
            return Ok(RespValue::Integer(1));
        }
        let Some(entry) = ks.get_mut(key, now) else {
            return Ok(RespValue::Integer(0));
        };
        entry.expire_at = Some(deadline);
        log.push("PEXPIREAT", vec![CmdArg::from(key), CmdArg::from(deadline)]);
        Ok(RespValue::Integer(1))
    })
}

#[derive(Debug, Clone)]
pub struct Ttl {
    pub key: Bytes,
}

#[derive(Debug, Clone)]
pub struct Pttl {
    pub key: Bytes,
}

impl ParseCommand for Ttl {
    fn parse(args: &[Bytes]) -> Result<Self, QdbError> {
        validate_arg_count(args, 1, "ttl")?;
        Ok(Ttl {
            key: args[0].clone(),
        })
    }
}

impl ParseCommand for Pttl {
    fn parse(args: &[Bytes]) -> Result<Self, QdbError> {
        validate_arg_count(args, 1, "pttl")?;
        Ok(Pttl {
            key: args[0].clone(),
        })
    }
}

/// Remaining time to live in milliseconds: `-2` when the key is missing, `-1` when it
/// has no deadline.
fn remaining_ms(ctx: &ExecutionContext<'_>, key: &Bytes) -> Result<i64, QdbError> {
    let now = unix_millis();
    ctx.state.store.read(ctx.db(), |ks| match ks.get(key, now) {
        None => -2,
        Some(entry) => match entry.expire_at {
            None => -1,
            Some(at) => at.saturating_sub(now) as i64,
        },
    })
}

#[async_trait]
impl ExecutableCommand for Ttl {
    async fn execute<'a>(&self, ctx: &mut ExecutionContext<'a>) -> Result<RespValue, QdbError> {
        let ms = remaining_ms(ctx, &self.key)?;
        Ok(RespValue::Integer(if ms < 0 { ms } else { (ms + 500) / 1000 }))
    }
}

#[async_trait]
impl ExecutableCommand for Pttl {
    async fn execute<'a>(&self, ctx: &mut ExecutionContext<'a>) -> Result<RespValue, QdbError> {
        Ok(RespValue::Integer(remaining_ms(ctx, &self.key)?))
    }
}
