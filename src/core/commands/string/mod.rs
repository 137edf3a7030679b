// src/core/commands/string/mod.rs

//! String commands.

mod get;
mod incr;
mod set;

pub use get::Get;
pub use incr::{Decr, Incr, IncrBy};
pub use set::{Set, SetCondition};
