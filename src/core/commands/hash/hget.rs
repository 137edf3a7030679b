// src/core/commands/hash/hget.rs

use crate::core::commands::command_trait::{ExecutableCommand, ExecutionContext, ParseCommand};
use crate::core::commands::helpers::validate_arg_count;
use crate::core::storage::{DataValue, unix_millis};
use crate::core::{QdbError, RespValue};
use async_trait::async_trait;
use bytes::Bytes;

#[derive(Debug, Clone)]
pub struct HGet {
    pub key: Bytes,
    pub field: Bytes,
}

impl ParseCommand for HGet {
    fn parse(args: &[Bytes]) -> Result<Self, QdbError> {
        validate_arg_count(args, 2, "hget")?;
        Ok(HGet {
            key: args[0].clone(),
            field: args[1].clone(),
        })
    }
}

#[async_trait]
impl ExecutableCommand for HGet {
    async fn execute<'a>(&self, ctx: &mut ExecutionContext<'a>) -> Result<RespValue, QdbError> {
        let now = unix_millis();
        ctx.state
            .store
            .read(ctx.db(), |ks| match ks.get(&self.key, now) {
                Some(entry) => match &entry.data {
                    DataValue::Hash(hash) => Ok(hash
                        .get(&self.field)
                        .map_or(RespValue::Null, |v| RespValue::BulkString(v.clone()))),
                    _ => Err(QdbError::WrongType),
                },
                None => Ok(RespValue::Null),
            })?
    }
}

#[derive(Debug, Clone)]
pub struct HGetAll {
    pub key: Bytes,
}

impl ParseCommand for HGetAll {
    fn parse(args: &[Bytes]) -> Result<Self, QdbError> {
        validate_arg_count(args, 1, "hgetall")?;
        Ok(HGetAll {
            key: args[0].clone(),
        })
    }
}

#[async_trait]
impl ExecutableCommand for HGetAll {
    async fn execute<'a>(&self, ctx: &mut ExecutionContext<'a>) -> Result<RespValue, QdbError> {
        let now = unix_millis();
        ctx.state
            .store
            .read(ctx.db(), |ks| match ks.get(&self.key, now) {
                Some(entry) => match &entry.data {
                    DataValue::Hash(hash) => Ok(RespValue::Array(
                        hash.iter()
                            .flat_map(|(f, v)| {
                                [
                                    RespValue::BulkString(f.clone()),
                                    RespValue::BulkString(v.clone()),
                                ]
                            })
                            .collect(),
                    )),
                    _ => Err(QdbError::WrongType),
                },
                None => Ok(RespValue::Array(Vec::new())),
            })?
    }
}
