// src/core/commands/helpers.rs

//! Provides helper functions for parsing command arguments.
//! These helpers reduce boilerplate and ensure consistent error handling across commands.

use crate::core::QdbError;
use bytes::Bytes;

/// Validates that the number of arguments is exactly `expected`.
pub fn validate_arg_count(args: &[Bytes], expected: usize, cmd: &str) -> Result<(), QdbError> {
    if args.len() != expected {
        Err(QdbError::WrongArgumentCount(cmd.to_string()))
    } else {
        Ok(())
    }
}

/// Interprets an argument as UTF-8 text.
pub fn extract_string(arg: &Bytes) -> Result<String, QdbError> {
    Ok(std::str::from_utf8(arg)?.to_string())
}

/// Parses an argument as a signed 64-bit integer.
pub fn parse_i64(arg: &Bytes) -> Result<i64, QdbError> {
    std::str::from_utf8(arg)
        .map_err(|_| QdbError::NotAnInteger)?
        .parse()
        .map_err(|_| QdbError::NotAnInteger)
}

/// Parses an argument as an unsigned 64-bit integer.
pub fn parse_u64(arg: &Bytes) -> Result<u64, QdbError> {
    std::str::from_utf8(arg)
        .map_err(|_| QdbError::NotAnInteger)?
        .parse()
        .map_err(|_| QdbError::NotAnInteger)
}

/// Case-insensitive comparison of an argument against an ASCII keyword.
pub fn arg_is(arg: &Bytes, keyword: &str) -> bool {
    arg.eq_ignore_ascii_case(keyword.as_bytes())
}

/// Parses a relative expiry of `amount` seconds or milliseconds into an absolute unix
/// millisecond timestamp.
pub fn absolute_expiry(amount: i64, unit_ms: i64, now_ms: u64) -> Result<u64, QdbError> {
    let delta = amount
        .checked_mul(unit_ms)
        .ok_or_else(|| QdbError::InvalidState("invalid expire time".into()))?;
    Ok((now_ms as i64).saturating_add(delta).max(0) as u64)
}
