// src/connection/mod.rs

//! Manages the lifecycle of a single client TCP connection, including command
//! parsing, execution routing, the hand-over to slave mode and the shared write half.

mod guard;
mod handler;
mod session;
mod writer;

pub use guard::ConnectionGuard;
pub use handler::ConnectionHandler;
pub use session::SessionState;
pub use writer::ConnWriter;
