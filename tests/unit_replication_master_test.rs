use bytes::Bytes;
use qdb::core::replication::{
    MasterConfig, ReplicationFeedHook, ReplicationMaster, encode_command, encode_select,
    generate_run_id,
};
use qdb::core::storage::{CmdArg, CommitLog, Keyspace, Store};
use std::sync::Arc;
use std::time::Duration;

const RUN_ID: &str = "0123456789abcdef0123456789abcdef01234567";

fn master_config() -> MasterConfig {
    MasterConfig {
        backlog_size: 1024 * 1024,
        backlog_file_path: String::new(),
        ping_period: Duration::from_secs(1),
        backlog_ttl: None,
    }
}

fn new_master() -> Arc<ReplicationMaster> {
    Arc::new(ReplicationMaster::new(RUN_ID.to_string(), master_config()))
}

fn window(master: &ReplicationMaster, from: u64) -> Vec<u8> {
    let mut buf = vec![0u8; 4096];
    let n = master.read_window(from, &mut buf).unwrap();
    buf.truncate(n);
    buf
}

#[test]
fn test_generate_run_id_is_40_hex_chars() {
    let a = generate_run_id().unwrap();
    let b = generate_run_id().unwrap();
    assert_eq!(a.len(), 40);
    assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    assert_ne!(a, b);
}

#[test]
fn test_encode_command_formats_typed_arguments() {
    let mut buf = Vec::new();
    encode_command(
        &mut buf,
        "INCRBY",
        &[CmdArg::Bytes(Bytes::from_static(b"k")), CmdArg::Int(-5)],
    );
    assert_eq!(buf, b"*3\r\n$6\r\nINCRBY\r\n$1\r\nk\r\n$2\r\n-5\r\n");

    let mut buf = Vec::new();
    encode_command(&mut buf, "X", &[CmdArg::Float(1.0), CmdArg::Float(2.5)]);
    assert_eq!(buf, b"*3\r\n$1\r\nX\r\n$1\r\n1\r\n$3\r\n2.5\r\n");
}

#[test]
fn test_encode_select() {
    let mut buf = Vec::new();
    encode_select(&mut buf, 3);
    assert_eq!(buf, b"*2\r\n$6\r\nSELECT\r\n$1\r\n3\r\n");
}

#[test]
fn test_feed_without_backlog_or_slaves_is_dropped() {
    let master = new_master();
    master.feed(0, "SET", &[CmdArg::from("k"), CmdArg::from("v")]);
    assert!(!master.has_backlog());
    assert_eq!(master.master_offset(), 0);
}

#[test]
fn test_snapshot_offset_creates_backlog_and_resets_selected_db() {
    let master = new_master();
    let offset = master.snapshot_offset().unwrap();
    assert!(master.has_backlog());
    // The first byte after the dump is one past the current offset.
    assert_eq!(offset, master.master_offset() + 1);

    let report = master.report();
    assert!(report.backlog_active);
    assert_eq!(report.histlen, 0);
    assert_eq!(report.first_byte, offset);
}

#[test]
fn test_feed_emits_select_only_on_database_change() {
    let master = new_master();
    let start = master.snapshot_offset().unwrap();

    master.feed(2, "DEL", &[CmdArg::from("a")]);
    master.feed(2, "DEL", &[CmdArg::from("b")]);
    master.feed(0, "DEL", &[CmdArg::from("c")]);

    let mut expected = Vec::new();
    encode_select(&mut expected, 2);
    encode_command(&mut expected, "DEL", &[CmdArg::from("a")]);
    encode_command(&mut expected, "DEL", &[CmdArg::from("b")]);
    encode_select(&mut expected, 0);
    encode_command(&mut expected, "DEL", &[CmdArg::from("c")]);

    assert_eq!(window(&master, start), expected);
    assert_eq!(master.master_offset(), start - 1 + expected.len() as u64);
    assert_eq!(master.last_selected_db(), 0);
}

#[test]
fn test_partial_sync_window_boundaries() {
    let master = new_master();
    master.snapshot_offset().unwrap();
    master.feed(0, "SET", &[CmdArg::from("k"), CmdArg::from("v")]);

    let report = master.report();
    let first = report.first_byte as i64;
    let len = report.histlen as i64;
    assert!(len > 0);

    assert!(!master.can_partial_sync(RUN_ID, first - 1));
    assert!(master.can_partial_sync(RUN_ID, first));
    assert!(master.can_partial_sync(RUN_ID, first + len));
    assert!(!master.can_partial_sync(RUN_ID, first + len + 1));
}

#[test]
fn test_partial_sync_requires_matching_run_id() {
    let master = new_master();
    master.snapshot_offset().unwrap();
    master.feed(0, "PING", &[]);
    let first = master.report().first_byte as i64;

    assert!(!master.can_partial_sync("?", first));
    assert!(!master.can_partial_sync(&"f".repeat(40), first));
    assert!(!master.can_partial_sync(RUN_ID, -1));
}

#[test]
fn test_read_window_rejects_cursor_outside_backlog() {
    let master = new_master();
    let start = master.snapshot_offset().unwrap();
    master.feed(0, "PING", &[]);
    let end = master.master_offset() + 1;

    let mut buf = [0u8; 64];
    assert!(master.read_window(start - 1, &mut buf).is_err());
    assert_eq!(master.read_window(end, &mut buf).unwrap(), 0);
    assert!(master.read_window(end + 1, &mut buf).is_err());
}

#[test]
fn test_backlog_wrap_moves_first_byte() {
    let master = new_master();
    master.snapshot_offset().unwrap();
    let value = "x".repeat(64 * 1024);
    for i in 0..20 {
        master.feed(0, "SET", &[CmdArg::from(format!("k{i}")), CmdArg::from(value.as_str())]);
    }
    let report = master.report();
    assert_eq!(report.histlen, 1024 * 1024);
    assert_eq!(report.first_byte, report.master_offset - report.histlen + 1);
    assert!(!master.can_partial_sync(RUN_ID, 2));
}

#[test]
fn test_heartbeat_feeds_ping_into_backlog() {
    let master = new_master();
    let start = master.snapshot_offset().unwrap();
    master.heartbeat();

    let mut expected = Vec::new();
    encode_command(&mut expected, "PING", &[]);
    assert_eq!(window(&master, start), expected);
}

#[test]
fn test_close_destroys_backlog() {
    let master = new_master();
    master.snapshot_offset().unwrap();
    master.feed(0, "PING", &[]);
    master.close();
    assert!(!master.has_backlog());
    assert!(!master.can_partial_sync(RUN_ID, 2));
}

#[test]
fn test_store_hook_feeds_committed_records_in_order() {
    let master = new_master();
    let start = master.snapshot_offset().unwrap();
    let store = Store::new(4);
    store.add_hook(Arc::new(ReplicationFeedHook::new(Arc::downgrade(&master))));

    store
        .update(1, |_: &mut Keyspace, log: &mut CommitLog| {
            log.push("SET", vec![CmdArg::from("a"), CmdArg::from("1")]);
            log.push("PEXPIREAT", vec![CmdArg::from("a"), CmdArg::Uint(42)]);
            Ok(())
        })
        .unwrap();

    let mut expected = Vec::new();
    encode_select(&mut expected, 1);
    encode_command(&mut expected, "SET", &[CmdArg::from("a"), CmdArg::from("1")]);
    encode_command(&mut expected, "PEXPIREAT", &[CmdArg::from("a"), CmdArg::Uint(42)]);
    assert_eq!(window(&master, start), expected);
}

#[test]
fn test_failed_update_publishes_nothing() {
    let master = new_master();
    master.snapshot_offset().unwrap();
    let offset = master.master_offset();
    let store = Store::new(1);
    store.add_hook(Arc::new(ReplicationFeedHook::new(Arc::downgrade(&master))));

    let result: Result<(), _> = store.update(0, |_, log| {
        log.push("DEL", vec![CmdArg::from("a")]);
        Err(qdb::core::QdbError::WrongType)
    });
    assert!(result.is_err());
    assert_eq!(master.master_offset(), offset);
}
