// src/core/commands/string/set.rs

use crate::core::commands::command_trait::{ExecutableCommand, ExecutionContext, ParseCommand};
use crate::core::commands::helpers::{absolute_expiry, arg_is, parse_i64};
use crate::core::storage::{CmdArg, DataValue, StoredValue, unix_millis};
use crate::core::{QdbError, RespValue};
use async_trait::async_trait;
use bytes::Bytes;

/// Defines the condition for `SET` execution (`NX` or `XX`).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum SetCondition {
    #[default]
    Always,
    /// `XX`: only set if the key already exists.
    IfExists,
    /// `NX`: only set if the key does not exist.
    IfNotExists,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Ttl {
    Seconds(i64),
    Milliseconds(i64),
}

#[derive(Debug, Clone)]
pub struct Set {
    pub key: Bytes,
    pub value: Bytes,
    ttl: Option<Ttl>,
    pub condition: SetCondition,
}

impl ParseCommand for Set {
    fn parse(args: &[Bytes]) -> Result<Self, QdbError> {
        if args.len() < 2 {
            return Err(QdbError::WrongArgumentCount("set".to_string()));
        }
        let mut cmd = Set {
            key: args[0].clone(),
            value: args[1].clone(),
            ttl: None,
            condition: SetCondition::Always,
        };

        let mut i = 2;
        while i < args.len() {
            let opt = &args[i];
            if arg_is(opt, "ex") || arg_is(opt, "px") {
                if cmd.ttl.is_some() {
                    return Err(QdbError::SyntaxError);
                }
                let amount = parse_i64(args.get(i + 1).ok_or(QdbError::SyntaxError)?)?;
                if amount <= 0 {
                    return Err(QdbError::InvalidState(
                        "invalid expire time in 'set' command".into(),
                    ));
                }
                cmd.ttl = Some(if arg_is(opt, "ex") {
                    Ttl::Seconds(amount)
                } else {
                    Ttl::Milliseconds(amount)
                });
                i += 2;
            } else if arg_is(opt, "nx") || arg_is(opt, "xx") {
                if cmd.condition != SetCondition::Always {
                    return Err(QdbError::SyntaxError);
                }
                cmd.condition = if arg_is(opt, "nx") {
                    SetCondition::IfNotExists
                } else {
                    SetCondition::IfExists
                };
                i += 1;
            } else {
                return Err(QdbError::SyntaxError);
            }
        }
        Ok(cmd)
    }
}

#[async_trait]
impl ExecutableCommand for Set {
    async fn execute<'a>(&self, ctx: &mut ExecutionContext<'a>) -> Result<RespValue, QdbError> {
        let now = unix_millis();
        let expire_at = match self.ttl {
            Some(Ttl::Seconds(s)) => Some(absolute_expiry(s, 1000, now)?),
            Some(Ttl::Milliseconds(ms)) => Some(absolute_expiry(ms, 1, now)?),
            None => None,
        };

        ctx.state.store.update(ctx.db(), |ks, log| {
            let exists = ks.contains(&self.key, now);
            let skip = match self.condition {
                SetCondition::Always => false,
                SetCondition::IfExists => !exists,
                SetCondition::IfNotExists => exists,
            };
            if skip {
                return Ok(RespValue::Null);
            }

            ks.insert(
                self.key.clone(),
                StoredValue::with_expiry(DataValue::String(self.value.clone()), expire_at),
            );
            // Slaves receive the absolute deadline, never the relative TTL.
            log.push("SET", vec![CmdArg::from(&self.key), CmdArg::from(&self.value)]);
            if let Some(at) = expire_at {
                log.push("PEXPIREAT", vec![CmdArg::from(&self.key), CmdArg::from(at)]);
            }
            Ok(RespValue::ok())
        })
    }
}
