// src/core/commands/hash/mod.rs

//! Hash commands.

mod hdel;
mod hget;
mod hset;

pub use hdel::HDel;
pub use hget::{HGet, HGetAll};
pub use hset::HSet;
