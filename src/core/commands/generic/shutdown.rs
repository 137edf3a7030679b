// src/core/commands/generic/shutdown.rs

use crate::core::commands::command_trait::{ExecutableCommand, ExecutionContext, ParseCommand};
use crate::core::commands::helpers::arg_is;
use crate::core::state::ShutdownRequest;
use crate::core::{QdbError, RespValue};
use async_trait::async_trait;
use bytes::Bytes;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct Shutdown {
    pub save: bool,
}

impl ParseCommand for Shutdown {
    fn parse(args: &[Bytes]) -> Result<Self, QdbError> {
        match args {
            [] => Ok(Shutdown { save: true }),
            [mode] if arg_is(mode, "save") => Ok(Shutdown { save: true }),
            [mode] if arg_is(mode, "nosave") => Ok(Shutdown { save: false }),
            _ => Err(QdbError::SyntaxError),
        }
    }
}

#[async_trait]
impl ExecutableCommand for Shutdown {
    async fn execute<'a>(&self, ctx: &mut ExecutionContext<'a>) -> Result<RespValue, QdbError> {
        warn!(
            "SHUTDOWN requested by a client (save: {}).",
            self.save
        );
        ctx.state
            .shutdown_request_tx
            .send(ShutdownRequest { save: self.save })
            .await
            .map_err(|_| QdbError::InvalidState("server is already shutting down".into()))?;
        Ok(RespValue::ok())
    }
}
