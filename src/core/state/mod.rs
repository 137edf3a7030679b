// src/core/state/mod.rs

//! Defines the central `ServerState` struct and all related state components.

mod client;
mod core;
mod stats;

pub use client::*;
pub use core::{LogReloadHandle, ServerInit, ServerState, ShutdownRequest};
pub use stats::StatsState;
