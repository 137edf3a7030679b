// src/core/commands/list/push.rs

//! `LPUSH` and `RPUSH`.

use crate::core::commands::command_trait::{ExecutableCommand, ExecutionContext, ParseCommand};
use crate::core::storage::{CmdArg, DataValue, StoredValue, unix_millis};
use crate::core::{QdbError, RespValue};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum End {
    Head,
    Tail,
}

#[derive(Debug, Clone)]
pub struct LPush {
    pub key: Bytes,
    pub values: Vec<Bytes>,
}

#[derive(Debug, Clone)]
pub struct RPush {
    pub key: Bytes,
    pub values: Vec<Bytes>,
}

fn parse_push(args: &[Bytes], name: &str) -> Result<(Bytes, Vec<Bytes>), QdbError> {
    if args.len() < 2 {
        return Err(QdbError::WrongArgumentCount(name.to_string()));
    }
    Ok((args[0].clone(), args[1..].to_vec()))
}

impl ParseCommand for LPush {
    fn parse(args: &[Bytes]) -> Result<Self, QdbError> {
        let (key, values) = parse_push(args, "lpush")?;
        Ok(LPush { key, values })
    }
}

impl ParseCommand for RPush {
    fn parse(args: &[Bytes]) -> Result<Self, QdbError> {
        let (key, values) = parse_push(args, "rpush")?;
        Ok(RPush { key, values })
    }
}

#[async_trait]
impl ExecutableCommand for LPush {
    async fn execute<'a>(&self, ctx: &mut ExecutionContext<'a>) -> Result<RespValue, QdbError> {
        push(ctx, &self.key, &self.values, End::Head)
    }
}

#[async_trait]
impl ExecutableCommand for RPush {
    async fn execute<'a>(&self, ctx: &mut ExecutionContext<'a>) -> Result<RespValue, QdbError> {
        push(ctx, &self.key, &self.values, End::Tail)
    }
}

fn push(
    ctx: &ExecutionContext<'_>,
    key: &Bytes,
    values: &[Bytes],
    end: End,
) -> Result<RespValue, QdbError> {
    let now = unix_millis();
    ctx.state.store.update(ctx.db(), |ks, log| {
        if ks.get_mut(key, now).is_none() {
            ks.insert(key.clone(), StoredValue::new(DataValue::List(VecDeque::new())));
        }
        let Some(entry) = ks.get_mut(key, now) else {
            return Err(QdbError::Internal("list vanished during push".into()));
        };
        let DataValue::List(list) = &mut entry.data else {
            return Err(QdbError::WrongType);
        };

        for value in values {
            match end {
                End::Head => list.push_front(value.clone()),
                End::Tail => list.push_back(value.clone()),
            }
        }
        let len = list.len() as i64;

        let mut args = Vec::with_capacity(values.len() + 1);
        args.push(CmdArg::from(key));
        args.extend(values.iter().map(CmdArg::from));
        log.push(if end == End::Head { "LPUSH" } else { "RPUSH" }, args);
        Ok(RespValue::Integer(len))
    })
}
