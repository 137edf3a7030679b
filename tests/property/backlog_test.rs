// tests/property/backlog_test.rs

//! Property-based tests for the backlog ring and the master's offset bookkeeping.

use proptest::prelude::*;
use qdb::core::replication::{
    Backlog, MasterConfig, ReplicationMaster, encode_command, encode_select,
};
use qdb::core::storage::CmdArg;
use std::time::Duration;

const RUN_ID: &str = "0123456789abcdef0123456789abcdef01234567";

/// The newest `capacity` bytes of everything written.
fn tail(model: &[u8], capacity: usize) -> &[u8] {
    &model[model.len().saturating_sub(capacity)..]
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 200,
        ..ProptestConfig::default()
    })]

    #[test]
    fn test_backlog_holds_tail_of_all_writes(
        capacity in 1usize..64,
        writes in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..100), 0..40)
    ) {
        let mut backlog = Backlog::in_memory(capacity);
        let mut model = Vec::new();
        for chunk in &writes {
            prop_assert_eq!(backlog.write(chunk).unwrap(), chunk.len());
            model.extend_from_slice(chunk);
        }

        let expected = tail(&model, capacity);
        prop_assert_eq!(backlog.len() as usize, expected.len());

        let mut buf = vec![0u8; capacity];
        let n = backlog.read_at(&mut buf, 0).unwrap();
        prop_assert_eq!(&buf[..n], expected);
    }

    #[test]
    fn test_backlog_relative_reads_match_model(
        capacity in 1usize..64,
        data in prop::collection::vec(any::<u8>(), 1..200),
        rel_seed in any::<u16>()
    ) {
        let mut backlog = Backlog::in_memory(capacity);
        backlog.write(&data).unwrap();
        let expected = tail(&data, capacity);
        let rel = rel_seed as usize % (expected.len() + 1);

        let mut buf = vec![0u8; capacity];
        let n = backlog.read_at(&mut buf, rel as u64).unwrap();
        prop_assert_eq!(&buf[..n], &expected[rel..]);
    }
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 100,
        ..ProptestConfig::default()
    })]

    #[test]
    fn test_master_window_and_psync_range(
        backlog_size in 64u64..512,
        commands in prop::collection::vec((0u32..4, "[a-z]{1,12}", "[a-z0-9]{0,24}"), 1..60)
    ) {
        let master = ReplicationMaster::new(
            RUN_ID.to_string(),
            MasterConfig {
                backlog_size,
                backlog_file_path: String::new(),
                ping_period: Duration::from_secs(1),
                backlog_ttl: None,
            },
        );
        let start = master.snapshot_offset().unwrap();

        let mut model = Vec::new();
        let mut last_db = None;
        for (db, key, value) in &commands {
            let args = [CmdArg::from(key.as_str()), CmdArg::from(value.as_str())];
            master.feed(*db, "SET", &args);
            if last_db != Some(*db) {
                encode_select(&mut model, *db);
                last_db = Some(*db);
            }
            encode_command(&mut model, "SET", &args);
        }

        // The stream is contiguous: the last byte sits at master_offset.
        prop_assert_eq!(master.master_offset() + 1, start + model.len() as u64);

        let report = master.report();
        let expected = tail(&model, backlog_size as usize);
        prop_assert_eq!(report.histlen as usize, expected.len());
        prop_assert_eq!(report.first_byte, master.master_offset() + 1 - report.histlen);

        let first = report.first_byte;
        let end = first + report.histlen;
        prop_assert!(master.can_partial_sync(RUN_ID, first as i64));
        prop_assert!(master.can_partial_sync(RUN_ID, end as i64));
        prop_assert!(!master.can_partial_sync(RUN_ID, end as i64 + 1));
        prop_assert!(!master.can_partial_sync("?", first as i64));
        if first > 0 {
            prop_assert!(!master.can_partial_sync(RUN_ID, first as i64 - 1));
        }

        let mut buf = vec![0u8; backlog_size as usize];
        let n = master.read_window(first, &mut buf).unwrap();
        prop_assert_eq!(&buf[..n], expected);
        prop_assert_eq!(master.read_window(end, &mut buf).unwrap(), 0);
    }
}
