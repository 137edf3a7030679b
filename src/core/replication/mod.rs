// src/core/replication/mod.rs

//! Master/slave replication: the backlog ring, the fan-out hook that fills it, the
//! per-slave feeders that drain it, the `SYNC`/`PSYNC` server and the slave engine.

pub mod backlog;
pub mod fanout;
pub mod feeder;
pub mod master;
pub mod pipe;
pub mod slave;
pub mod sync;

pub use backlog::Backlog;
pub use fanout::{ReplicationFeedHook, encode_command, encode_select};
pub use master::{
    MasterConfig, MasterReport, NO_DB, ReplicationMaster, SlaveInfo, SlaveSyncState,
    generate_run_id,
};
pub use pipe::{PipeReader, PipeWriter, pipe};
pub use slave::{FollowRequest, LinkState, ReplicationSlave, SlaveReport, run_daemon};
pub use sync::{SyncRequest, serve_sync};
