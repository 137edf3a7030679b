// src/core/handler/pipeline/state_check.rs

//! Pipeline steps that gate a command on the session and the server role.

use crate::connection::SessionState;
use crate::core::QdbError;
use crate::core::commands::command_trait::CommandFlags;
use crate::core::state::ServerState;

/// Rejects everything but `NO_AUTH` commands until the session has authenticated.
pub fn check_auth(
    state: &ServerState,
    session: &SessionState,
    flags: CommandFlags,
) -> Result<(), QdbError> {
    if state.requires_auth()
        && !session.is_authenticated
        && !flags.contains(CommandFlags::NO_AUTH)
    {
        return Err(QdbError::AuthRequired);
    }
    Ok(())
}

/// Checks the command against the server's replication role.
pub fn check_server_state(
    state: &ServerState,
    session: &SessionState,
    flags: CommandFlags,
) -> Result<(), QdbError> {
    if session.is_master_link {
        if flags.contains(CommandFlags::ADMIN) {
            return Err(QdbError::InvalidState(
                "command not allowed on the replication link".into(),
            ));
        }
        return Ok(());
    }

    // Only the master link may write to a slave.
    if flags.contains(CommandFlags::WRITE) && state.slave.is_following() {
        return Err(QdbError::ReadOnlySlave);
    }
    Ok(())
}
