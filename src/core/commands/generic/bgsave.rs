// src/core/commands/generic/bgsave.rs

//! `BGSAVE` and `BGSAVETO`: background dumps through the snapshot pipeline. Both
//! compete with full resyncs for the single bgsave slot.

use crate::core::commands::command_trait::{ExecutableCommand, ExecutionContext, ParseCommand};
use crate::core::commands::helpers::{extract_string, validate_arg_count};
use crate::core::persistence::rdb_saver::{BGSAVE_ACQUIRE_TIMEOUT, acquire_bgsave, spawn_bgsave};
use crate::core::{QdbError, RespValue};
use async_trait::async_trait;
use bytes::Bytes;

#[derive(Debug, Clone, Default)]
pub struct Bgsave;

impl ParseCommand for Bgsave {
    fn parse(args: &[Bytes]) -> Result<Self, QdbError> {
        validate_arg_count(args, 0, "bgsave")?;
        Ok(Bgsave)
    }
}

#[async_trait]
impl ExecutableCommand for Bgsave {
    async fn execute<'a>(&self, ctx: &mut ExecutionContext<'a>) -> Result<RespValue, QdbError> {
        let path = ctx.state.config.dump_filepath.clone();
        start_bgsave(ctx, path).await
    }
}

#[derive(Debug, Clone)]
pub struct BgsaveTo {
    pub path: String,
}

impl ParseCommand for BgsaveTo {
    fn parse(args: &[Bytes]) -> Result<Self, QdbError> {
        validate_arg_count(args, 1, "bgsaveto")?;
        Ok(BgsaveTo {
            path: extract_string(&args[0])?,
        })
    }
}

#[async_trait]
impl ExecutableCommand for BgsaveTo {
    async fn execute<'a>(&self, ctx: &mut ExecutionContext<'a>) -> Result<RespValue, QdbError> {
        start_bgsave(ctx, self.path.clone()).await
    }
}

async fn start_bgsave(ctx: &ExecutionContext<'_>, path: String) -> Result<RespValue, QdbError> {
    let permit = acquire_bgsave(&ctx.state.bgsave, BGSAVE_ACQUIRE_TIMEOUT).await?;
    spawn_bgsave(ctx.state.store.clone(), path, permit);
    Ok(RespValue::SimpleString("Background saving started".into()))
}
