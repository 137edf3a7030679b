// src/core/commands/string/get.rs

use crate::core::commands::command_trait::{ExecutableCommand, ExecutionContext, ParseCommand};
use crate::core::commands::helpers::validate_arg_count;
use crate::core::storage::{DataValue, unix_millis};
use crate::core::{QdbError, RespValue};
use async_trait::async_trait;
use bytes::Bytes;

#[derive(Debug, Clone)]
pub struct Get {
    pub key: Bytes,
}

impl ParseCommand for Get {
    fn parse(args: &[Bytes]) -> Result<Self, QdbError> {
        validate_arg_count(args, 1, "get")?;
        Ok(Get {
            key: args[0].clone(),
        })
    }
}

#[async_trait]
impl ExecutableCommand for Get {
    async fn execute<'a>(&self, ctx: &mut ExecutionContext<'a>) -> Result<RespValue, QdbError> {
        let now = unix_millis();
        ctx.state
            .store
            .read(ctx.db(), |ks| match ks.get(&self.key, now) {
                Some(entry) => match &entry.data {
                    DataValue::String(value) => Ok(RespValue::BulkString(value.clone())),
                    _ => Err(QdbError::WrongType),
                },
                None => Ok(RespValue::Null),
            })?
    }
}
