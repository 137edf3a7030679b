// src/core/commands/generic/keys.rs

//! Whole-key commands: `DEL`, `EXISTS`, `DBSIZE` and `FLUSHALL`.

use crate::core::commands::command_trait::{ExecutableCommand, ExecutionContext, ParseCommand};
use crate::core::commands::helpers::arg_is;
use crate::core::storage::{CmdArg, unix_millis};
use crate::core::{QdbError, RespValue};
use async_trait::async_trait;
use bytes::Bytes;

#[derive(Debug, Clone)]
pub struct Del {
    pub keys: Vec<Bytes>,
}

impl ParseCommand for Del {
    fn parse(args: &[Bytes]) -> Result<Self, QdbError> {
        if args.is_empty() {
            return Err(QdbError::WrongArgumentCount("del".to_string()));
        }
        Ok(Del {
            keys: args.to_vec(),
        })
    }
}

#[async_trait]
impl ExecutableCommand for Del {
    async fn execute<'a>(&self, ctx: &mut ExecutionContext<'a>) -> Result<RespValue, QdbError> {
        let now = unix_millis();
        ctx.state.store.update(ctx.db(), |ks, log| {
            let deleted: Vec<CmdArg> = self
                .keys
                .iter()
                .filter(|key| ks.remove(key, now).is_some())
                .map(CmdArg::from)
                .collect();
            let count = deleted.len() as i64;
            if !deleted.is_empty() {
                log.push("DEL", deleted);
            }
            Ok(RespValue::Integer(count))
        })
    }
}

#[derive(Debug, Clone)]
pub struct Exists {
    pub keys: Vec<Bytes>,
}

impl ParseCommand for Exists {
    fn parse(args: &[Bytes]) -> Result<Self, QdbError> {
        if args.is_empty() {
            return Err(QdbError::WrongArgumentCount("exists".to_string()));
        }
        Ok(Exists {
            keys: args.to_vec(),
        })
    }
}

#[async_trait]
impl ExecutableCommand for Exists {
    async fn execute<'a>(&self, ctx: &mut ExecutionContext<'a>) -> Result<RespValue, QdbError> {
        let now = unix_millis();
        let count = ctx.state.store.read(ctx.db(), |ks| {
            self.keys.iter().filter(|key| ks.contains(key, now)).count()
        })?;
        Ok(RespValue::Integer(count as i64))
    }
}

#[derive(Debug, Clone, Default)]
pub struct DbSize;

impl ParseCommand for DbSize {
    fn parse(args: &[Bytes]) -> Result<Self, QdbError> {
        if !args.is_empty() {
            return Err(QdbError::WrongArgumentCount("dbsize".to_string()));
        }
        Ok(DbSize)
    }
}

#[async_trait]
impl ExecutableCommand for DbSize {
    async fn execute<'a>(&self, ctx: &mut ExecutionContext<'a>) -> Result<RespValue, QdbError> {
        let size = ctx.state.store.dbsize(ctx.db())?;
        Ok(RespValue::Integer(size as i64))
    }
}

#[derive(Debug, Clone, Default)]
pub struct FlushAll;

impl ParseCommand for FlushAll {
    fn parse(args: &[Bytes]) -> Result<Self, QdbError> {
        match args {
            [] => Ok(FlushAll),
            [mode] if arg_is(mode, "sync") || arg_is(mode, "async") => Ok(FlushAll),
            _ => Err(QdbError::SyntaxError),
        }
    }
}

#[async_trait]
impl ExecutableCommand for FlushAll {
    async fn execute<'a>(&self, ctx: &mut ExecutionContext<'a>) -> Result<RespValue, QdbError> {
        ctx.state.store.flush_all(true);
        Ok(RespValue::ok())
    }
}
