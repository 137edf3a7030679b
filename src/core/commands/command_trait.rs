// src/core/commands/command_trait.rs

//! Defines the core traits for all executable commands.

use crate::connection::SessionState;
use crate::core::state::ServerState;
use crate::core::{QdbError, RespValue};
use async_trait::async_trait;
use bitflags::bitflags;
use bytes::Bytes;
use std::sync::Arc;

bitflags! {
    /// Flags that describe the properties and behavior of a command.
    /// These are used by the router to decide whether a command may run.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CommandFlags: u32 {
        /// The command modifies the dataset. Rejected on a slave unless it arrives
        /// from the master link.
        const WRITE          = 1 << 0;
        /// The command only reads data.
        const READONLY       = 1 << 1;
        /// An administrative command. Never executed from the master link.
        const ADMIN          = 1 << 2;
        /// The command is accepted before the connection authenticated.
        const NO_AUTH        = 1 << 3;
    }
}

/// Everything a command may touch while it runs.
pub struct ExecutionContext<'a> {
    pub state: Arc<ServerState>,
    pub session: &'a mut SessionState,
}

impl ExecutionContext<'_> {
    /// The database the session currently has selected.
    pub fn db(&self) -> usize {
        self.session.current_db
    }
}

/// A composite trait implemented on the main `Command` enum.
#[async_trait]
pub trait CommandExt {
    /// Returns the flags for the command.
    fn get_flags(&self) -> CommandFlags;

    /// Executes the command within a given `ExecutionContext`.
    async fn execute<'a>(&self, ctx: &mut ExecutionContext<'a>) -> Result<RespValue, QdbError>;
}

/// A trait for the actual execution logic of a command.
/// Implemented by each command's struct (e.g., `Get`, `Set`).
#[async_trait]
pub trait ExecutableCommand {
    async fn execute<'a>(&self, ctx: &mut ExecutionContext<'a>) -> Result<RespValue, QdbError>;
}

/// A trait for parsing a command's arguments. `args` excludes the command name.
pub trait ParseCommand: Sized {
    fn parse(args: &[Bytes]) -> Result<Self, QdbError>;
}
