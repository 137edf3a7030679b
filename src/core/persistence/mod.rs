// src/core/persistence/mod.rs

//! RDB dumps: the file format, the snapshot pipeline that produces it and the
//! parallel loader that consumes it.

pub mod rdb;
pub mod rdb_loader;
pub mod rdb_saver;

pub use rdb::{RdbDecoder, RdbEncoder, RdbEntry};
pub use rdb_loader::{CountingReader, load_dump_file, load_parallel};
pub use rdb_saver::{BgsavePermit, acquire_bgsave, dump_snapshot, save_store, spawn_bgsave};
