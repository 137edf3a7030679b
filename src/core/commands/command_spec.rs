// src/core/commands/command_spec.rs

//! The static description of a command kept in the command table.

use super::Command;
use crate::core::QdbError;
use crate::core::commands::command_trait::CommandFlags;
use bytes::Bytes;

/// One entry of the process-wide command table.
#[derive(Clone, Copy)]
pub struct CommandSpec {
    /// The name of the command in lowercase.
    pub name: &'static str,
    /// Redis-style arity, counting the command name.
    /// - Positive integer: fixed number of arguments.
    /// - Negative integer: minimum number of arguments (e.g., -2 for `GET key`).
    pub arity: i64,
    pub flags: CommandFlags,
    pub(crate) parse: fn(&[Bytes]) -> Result<Command, QdbError>,
}

impl CommandSpec {
    /// Checks `argc` (including the name) against the arity.
    pub fn accepts(&self, argc: usize) -> bool {
        let argc = argc as i64;
        if self.arity >= 0 {
            argc == self.arity
        } else {
            argc >= -self.arity
        }
    }

    /// Parses the arguments that follow the command name.
    pub fn parse(&self, args: &[Bytes]) -> Result<Command, QdbError> {
        (self.parse)(args)
    }
}

impl std::fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandSpec")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .field("flags", &self.flags)
            .finish()
    }
}
