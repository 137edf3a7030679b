// src/core/handler/command_router.rs

//! The central component for routing commands to their handlers.
//!
//! The `Router` takes the raw arguments of one request, resolves them against the
//! command table and subjects them to a series of checks before dispatching. Commands
//! replayed from a master go through the same path with a master-link session.

use super::pipeline::state_check;
use crate::connection::SessionState;
use crate::core::commands::command_trait::{CommandExt, CommandFlags, ExecutionContext};
use crate::core::commands::{self, Command};
use crate::core::metrics;
use crate::core::replication::SyncRequest;
use crate::core::state::ServerState;
use crate::core::{QdbError, RespValue};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Instant;
use tracing::{Instrument, info_span};

/// Represents the kinds of responses a routed command can produce.
#[derive(Debug)]
pub enum RouteResponse {
    /// A single RESP value. This is the most common response type.
    Single(RespValue),
    /// No reply is written. Used by `REPLCONF ACK`.
    NoOp,
    /// The connection asked to become a slave; the handler takes it over.
    Sync(SyncRequest),
}

/// The `Router` receives the arguments of one request and directs them through the
/// processing pipeline.
pub struct Router<'a> {
    state: Arc<ServerState>,
    session: &'a mut SessionState,
}

impl<'a> Router<'a> {
    pub fn new(state: Arc<ServerState>, session: &'a mut SessionState) -> Self {
        Self { state, session }
    }

    /// Routes one request. `args[0]` is the command name.
    pub async fn route(&mut self, args: Vec<Bytes>) -> Result<RouteResponse, QdbError> {
        let Some(name) = args.first() else {
            return Err(QdbError::Protocol("empty command".into()));
        };
        let Some(spec) = commands::lookup(name) else {
            state_check::check_auth(&self.state, self.session, CommandFlags::empty())?;
            return Err(QdbError::UnknownCommand(
                String::from_utf8_lossy(name).into_owned(),
            ));
        };

        let span = info_span!(
            "command",
            name = spec.name,
            client.id = self.session.session_id,
            master_link = self.session.is_master_link,
        );

        async move {
            let start_time = Instant::now();
            self.state.stats.increment_total_commands();
            metrics::COMMANDS_PROCESSED_TOTAL.inc();

            // --- COMMAND PROCESSING PIPELINE ---
            state_check::check_auth(&self.state, self.session, spec.flags)?;
            if !spec.accepts(args.len()) {
                return Err(QdbError::WrongArgumentCount(spec.name.to_string()));
            }
            state_check::check_server_state(&self.state, self.session, spec.flags)?;
            let command = spec.parse(&args[1..])?;
            // --- END OF PIPELINE ---

            let result = self.dispatch(command).await;
            metrics::COMMAND_LATENCY_SECONDS.observe(start_time.elapsed().as_secs_f64());
            result
        }
        .instrument(span)
        .await
    }

    async fn dispatch(&mut self, command: Command) -> Result<RouteResponse, QdbError> {
        match command {
            Command::Sync(cmd) => Ok(RouteResponse::Sync(cmd.request())),
            Command::Psync(cmd) => Ok(RouteResponse::Sync(cmd.request())),
            Command::Replconf(cmd) if cmd.is_ack() => Ok(RouteResponse::NoOp),
            command => {
                let mut ctx = ExecutionContext {
                    state: self.state.clone(),
                    session: &mut *self.session,
                };
                command.execute(&mut ctx).await.map(RouteResponse::Single)
            }
        }
    }
}
