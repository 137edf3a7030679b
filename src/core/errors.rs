// src/core/errors.rs

//! Defines the primary error type for the entire application.

use std::num::ParseIntError;
use std::sync::Arc;
use thiserror::Error;

/// The main error enum, representing all possible failures within the server.
///
/// The `Display` text of a variant is exactly what a client sees after the leading `-`
/// of a RESP error line.
#[derive(Error, Debug)]
pub enum QdbError {
    #[error("ERR IO error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("Incomplete data in stream")]
    IncompleteData,

    #[error("ERR Protocol error: {0}")]
    Protocol(String),

    /// A bulk payload was not followed by CRLF. The connection cannot be resynchronized.
    #[error("ERR Protocol error: bad line terminator")]
    BadLineTerminator,

    #[error("ERR unknown command '{0}'")]
    UnknownCommand(String),

    #[error("ERR syntax error")]
    SyntaxError,

    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArgumentCount(String),

    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,

    #[error("ERR value is not an integer or out of range")]
    NotAnInteger,

    #[error("ERR increment or decrement would overflow")]
    Overflow,

    #[error("ERR invalid DB index")]
    InvalidDbIndex,

    #[error("NOAUTH Authentication required")]
    AuthRequired,

    #[error("ERR invalid password")]
    InvalidPassword,

    #[error("READONLY You can't write against a read only slave.")]
    ReadOnlySlave,

    #[error("ERR {0}")]
    InvalidState(String),

    #[error("ERR wait others do bgsave timeout")]
    BgsaveTimeout,

    #[error("ERR replication error: {0}")]
    Replication(String),

    #[error("ERR bad rdb: {0}")]
    Rdb(String),

    #[error("ERR internal error: {0}")]
    Internal(String),
}

// `std::io::Error` is not cloneable, so the Io variant shares it behind an Arc.
impl Clone for QdbError {
    fn clone(&self) -> Self {
        match self {
            QdbError::Io(e) => QdbError::Io(Arc::clone(e)),
            QdbError::IncompleteData => QdbError::IncompleteData,
            QdbError::Protocol(s) => QdbError::Protocol(s.clone()),
            QdbError::BadLineTerminator => QdbError::BadLineTerminator,
            QdbError::UnknownCommand(s) => QdbError::UnknownCommand(s.clone()),
            QdbError::SyntaxError => QdbError::SyntaxError,
            QdbError::WrongArgumentCount(s) => QdbError::WrongArgumentCount(s.clone()),
            QdbError::WrongType => QdbError::WrongType,
            QdbError::NotAnInteger => QdbError::NotAnInteger,
            QdbError::Overflow => QdbError::Overflow,
            QdbError::InvalidDbIndex => QdbError::InvalidDbIndex,
            QdbError::AuthRequired => QdbError::AuthRequired,
            QdbError::InvalidPassword => QdbError::InvalidPassword,
            QdbError::ReadOnlySlave => QdbError::ReadOnlySlave,
            QdbError::InvalidState(s) => QdbError::InvalidState(s.clone()),
            QdbError::BgsaveTimeout => QdbError::BgsaveTimeout,
            QdbError::Replication(s) => QdbError::Replication(s.clone()),
            QdbError::Rdb(s) => QdbError::Rdb(s.clone()),
            QdbError::Internal(s) => QdbError::Internal(s.clone()),
        }
    }
}

impl PartialEq for QdbError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (QdbError::Io(e1), QdbError::Io(e2)) => e1.kind() == e2.kind(),
            (QdbError::Protocol(s1), QdbError::Protocol(s2)) => s1 == s2,
            (QdbError::UnknownCommand(s1), QdbError::UnknownCommand(s2)) => s1 == s2,
            (QdbError::WrongArgumentCount(s1), QdbError::WrongArgumentCount(s2)) => s1 == s2,
            (QdbError::InvalidState(s1), QdbError::InvalidState(s2)) => s1 == s2,
            (QdbError::Replication(s1), QdbError::Replication(s2)) => s1 == s2,
            (QdbError::Rdb(s1), QdbError::Rdb(s2)) => s1 == s2,
            (QdbError::Internal(s1), QdbError::Internal(s2)) => s1 == s2,
            _ => core::mem::discriminant(self) == core::mem::discriminant(other),
        }
    }
}

impl QdbError {
    /// True for errors after which the connection's byte stream can no longer be trusted.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            QdbError::Io(_) | QdbError::BadLineTerminator | QdbError::Protocol(_)
        )
    }
}

// --- From trait implementations for easy error conversion ---

impl From<std::io::Error> for QdbError {
    fn from(e: std::io::Error) -> Self {
        QdbError::Io(Arc::new(e))
    }
}

impl From<ParseIntError> for QdbError {
    fn from(_: ParseIntError) -> Self {
        QdbError::NotAnInteger
    }
}

impl From<std::str::Utf8Error> for QdbError {
    fn from(_: std::str::Utf8Error) -> Self {
        QdbError::SyntaxError
    }
}

impl From<tokio::time::error::Elapsed> for QdbError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        QdbError::Io(Arc::new(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "operation timed out",
        )))
    }
}

impl From<tokio::task::JoinError> for QdbError {
    fn from(e: tokio::task::JoinError) -> Self {
        QdbError::Internal(format!("background task failed: {e}"))
    }
}
