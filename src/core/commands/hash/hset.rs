// src/core/commands/hash/hset.rs

use crate::core::commands::command_trait::{ExecutableCommand, ExecutionContext, ParseCommand};
use crate::core::storage::{CmdArg, DataValue, StoredValue, unix_millis};
use crate::core::{QdbError, RespValue};
use async_trait::async_trait;
use bytes::Bytes;
use indexmap::IndexMap;

#[derive(Debug, Clone)]
pub struct HSet {
    pub key: Bytes,
    pub fields: Vec<(Bytes, Bytes)>,
}

impl ParseCommand for HSet {
    fn parse(args: &[Bytes]) -> Result<Self, QdbError> {
        if args.len() < 3 || args.len() % 2 == 0 {
            return Err(QdbError::WrongArgumentCount("hset".to_string()));
        }
        let fields = args[1..]
            .chunks_exact(2)
            .map(|pair| (pair[0].clone(), pair[1].clone()))
            .collect();
        Ok(HSet {
            key: args[0].clone(),
            fields,
        })
    }
}

#[async_trait]
impl ExecutableCommand for HSet {
    async fn execute<'a>(&self, ctx: &mut ExecutionContext<'a>) -> Result<RespValue, QdbError> {
        let now = unix_millis();
        ctx.state.store.update(ctx.db(), |ks, log| {
            if ks.get_mut(&self.key, now).is_none() {
                ks.insert(
                    self.key.clone(),
                    StoredValue::new(DataValue::Hash(IndexMap::new())),
                );
            }
            let Some(entry) = ks.get_mut(&self.key, now) else {
                return Err(QdbError::Internal("hash vanished during HSET".into()));
            };
            let DataValue::Hash(hash) = &mut entry.data else {
                return Err(QdbError::WrongType);
            };

            let mut added = 0;
            let mut args = Vec::with_capacity(1 + self.fields.len() * 2);
            args.push(CmdArg::from(&self.key));
            for (field, value) in &self.fields {
                if hash.insert(field.clone(), value.clone()).is_none() {
                    added += 1;
                }
                args.push(CmdArg::from(field));
                args.push(CmdArg::from(value));
            }
            log.push("HSET", args);
            Ok(RespValue::Integer(added))
        })
    }
}
