// src/core/commands/generic/ping.rs

use crate::core::commands::command_trait::{ExecutableCommand, ExecutionContext, ParseCommand};
use crate::core::commands::helpers::validate_arg_count;
use crate::core::{QdbError, RespValue};
use async_trait::async_trait;
use bytes::Bytes;

#[derive(Debug, Clone, Default)]
pub struct Ping {
    pub message: Option<Bytes>,
}

impl ParseCommand for Ping {
    fn parse(args: &[Bytes]) -> Result<Self, QdbError> {
        match args {
            [] => Ok(Ping { message: None }),
            [message] => Ok(Ping {
                message: Some(message.clone()),
            }),
            _ => Err(QdbError::WrongArgumentCount("ping".to_string())),
        }
    }
}

#[async_trait]
impl ExecutableCommand for Ping {
    async fn execute<'a>(&self, _ctx: &mut ExecutionContext<'a>) -> Result<RespValue, QdbError> {
        Ok(match &self.message {
            Some(message) => RespValue::BulkString(message.clone()),
            None => RespValue::SimpleString("PONG".into()),
        })
    }
}

#[derive(Debug, Clone)]
pub struct Echo {
    pub message: Bytes,
}

impl ParseCommand for Echo {
    fn parse(args: &[Bytes]) -> Result<Self, QdbError> {
        validate_arg_count(args, 1, "echo")?;
        Ok(Echo {
            message: args[0].clone(),
        })
    }
}

#[async_trait]
impl ExecutableCommand for Echo {
    async fn execute<'a>(&self, _ctx: &mut ExecutionContext<'a>) -> Result<RespValue, QdbError> {
        Ok(RespValue::BulkString(self.message.clone()))
    }
}
