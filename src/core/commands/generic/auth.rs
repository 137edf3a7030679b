// src/core/commands/generic/auth.rs

use crate::core::commands::command_trait::{ExecutableCommand, ExecutionContext, ParseCommand};
use crate::core::commands::helpers::{extract_string, parse_u64, validate_arg_count};
use crate::core::{QdbError, RespValue};
use async_trait::async_trait;
use bytes::Bytes;

#[derive(Debug, Clone)]
pub struct Auth {
    pub password: String,
}

impl ParseCommand for Auth {
    fn parse(args: &[Bytes]) -> Result<Self, QdbError> {
        validate_arg_count(args, 1, "auth")?;
        Ok(Auth {
            password: extract_string(&args[0])?,
        })
    }
}

#[async_trait]
impl ExecutableCommand for Auth {
    async fn execute<'a>(&self, ctx: &mut ExecutionContext<'a>) -> Result<RespValue, QdbError> {
        if !ctx.state.requires_auth() {
            return Err(QdbError::InvalidState(
                "Client sent AUTH, but no password is set".into(),
            ));
        }
        if self.password != ctx.state.config.auth {
            ctx.session.is_authenticated = false;
            return Err(QdbError::InvalidPassword);
        }
        ctx.session.is_authenticated = true;
        Ok(RespValue::ok())
    }
}

#[derive(Debug, Clone)]
pub struct Select {
    pub db_index: usize,
}

impl ParseCommand for Select {
    fn parse(args: &[Bytes]) -> Result<Self, QdbError> {
        validate_arg_count(args, 1, "select")?;
        let db_index = parse_u64(&args[0]).map_err(|_| QdbError::InvalidDbIndex)?;
        Ok(Select {
            db_index: db_index as usize,
        })
    }
}

#[async_trait]
impl ExecutableCommand for Select {
    async fn execute<'a>(&self, ctx: &mut ExecutionContext<'a>) -> Result<RespValue, QdbError> {
        if self.db_index >= ctx.state.store.databases() {
            return Err(QdbError::InvalidDbIndex);
        }
        ctx.session.current_db = self.db_index;
        Ok(RespValue::ok())
    }
}
