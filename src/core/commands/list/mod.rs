// src/core/commands/list/mod.rs

//! List commands.

mod lrange;
mod push;

pub use lrange::LRange;
pub use push::{LPush, RPush};
