// src/core/commands/list/lrange.rs

use crate::core::commands::command_trait::{ExecutableCommand, ExecutionContext, ParseCommand};
use crate::core::commands::helpers::{parse_i64, validate_arg_count};
use crate::core::storage::{DataValue, unix_millis};
use crate::core::{QdbError, RespValue};
use async_trait::async_trait;
use bytes::Bytes;

#[derive(Debug, Clone)]
pub struct LRange {
    pub key: Bytes,
    pub start: i64,
    pub stop: i64,
}

impl ParseCommand for LRange {
    fn parse(args: &[Bytes]) -> Result<Self, QdbError> {
        validate_arg_count(args, 3, "lrange")?;
        Ok(LRange {
            key: args[0].clone(),
            start: parse_i64(&args[1])?,
            stop: parse_i64(&args[2])?,
        })
    }
}

/// Resolves Redis-style inclusive, possibly negative, indices against `len`.
fn resolve_range(start: i64, stop: i64, len: usize) -> Option<(usize, usize)> {
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    (start <= stop && start < len).then_some((start as usize, stop as usize))
}

#[async_trait]
impl ExecutableCommand for LRange {
    async fn execute<'a>(&self, ctx: &mut ExecutionContext<'a>) -> Result<RespValue, QdbError> {
        let now = unix_millis();
        ctx.state
            .store
            .read(ctx.db(), |ks| match ks.get(&self.key, now) {
                Some(entry) => match &entry.data {
                    DataValue::List(list) => {
                        let items = resolve_range(self.start, self.stop, list.len())
                            .map(|(from, to)| {
                                list.range(from..=to)
                                    .map(|v| RespValue::BulkString(v.clone()))
                                    .collect()
                            })
                            .unwrap_or_default();
                        Ok(RespValue::Array(items))
                    }
                    _ => Err(QdbError::WrongType),
                },
                None => Ok(RespValue::Array(Vec::new())),
            })?
    }
}
