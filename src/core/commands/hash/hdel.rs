// src/core/commands/hash/hdel.rs

use crate::core::commands::command_trait::{ExecutableCommand, ExecutionContext, ParseCommand};
use crate::core::storage::{CmdArg, DataValue, unix_millis};
use crate::core::{QdbError, RespValue};
use async_trait::async_trait;
use bytes::Bytes;

#[derive(Debug, Clone)]
pub struct HDel {
    pub key: Bytes,
    pub fields: Vec<Bytes>,
}

impl ParseCommand for HDel {
    fn parse(args: &[Bytes]) -> Result<Self, QdbError> {
        if args.len() < 2 {
            return Err(QdbError::WrongArgumentCount("hdel".to_string()));
        }
        Ok(HDel {
            key: args[0].clone(),
            fields: args[1..].to_vec(),
        })
    }
}

#[async_trait]
impl ExecutableCommand for HDel {
    async fn execute<'a>(&self, ctx: &mut ExecutionContext<'a>) -> Result<RespValue, QdbError> {
        let now = unix_millis();
        ctx.state.store.update(ctx.db(), |ks, log| {
            let Some(entry) = ks.get_mut(&self.key, now) else {
                return Ok(RespValue::Integer(0));
            };
            let DataValue::Hash(hash) = &mut entry.data else {
                return Err(QdbError::WrongType);
            };

            let mut args = vec![CmdArg::from(&self.key)];
            for field in &self.fields {
                if hash.shift_remove(field).is_some() {
                    args.push(CmdArg::from(field));
                }
            }
            let removed = (args.len() - 1) as i64;
            if hash.is_empty() {
                ks.purge(&self.key);
            }
            if removed > 0 {
                log.push("HDEL", args);
            }
            Ok(RespValue::Integer(removed))
        })
    }
}
