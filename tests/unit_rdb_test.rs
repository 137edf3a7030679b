use bytes::Bytes;
use indexmap::IndexMap;
use qdb::core::persistence::{
    RdbDecoder, RdbEncoder, RdbEntry, dump_snapshot, load_dump_file, load_parallel,
};
use qdb::core::storage::{DataValue, SnapshotObject, Store, StoredValue, unix_millis};
use std::collections::VecDeque;
use std::sync::Arc;
use tempfile::TempDir;

fn b(s: &str) -> Bytes {
    Bytes::copy_from_slice(s.as_bytes())
}

fn sample_objects() -> Vec<SnapshotObject> {
    let mut hash = IndexMap::new();
    hash.insert(b("f1"), b("v1"));
    hash.insert(b("f2"), b("v2"));
    let list: VecDeque<Bytes> = [b("a"), b("b"), b("c")].into_iter().collect();
    let expire_at = unix_millis() + 60_000;

    vec![
        SnapshotObject {
            db: 0,
            key: b("str"),
            value: StoredValue::new(DataValue::String(b("hello"))),
        },
        SnapshotObject {
            db: 0,
            key: b("list"),
            value: StoredValue::new(DataValue::List(list)),
        },
        SnapshotObject {
            db: 3,
            key: b("hash"),
            value: StoredValue::with_expiry(DataValue::Hash(hash), Some(expire_at)),
        },
    ]
}

fn encode(objects: &[SnapshotObject]) -> Vec<u8> {
    let mut encoder = RdbEncoder::new(Vec::new()).unwrap();
    encoder.write_objects(objects).unwrap();
    let (bytes, size) = encoder.finish().unwrap();
    assert_eq!(size, bytes.len() as u64);
    bytes
}

async fn decode_all(bytes: &[u8], databases: usize) -> Result<Vec<RdbEntry>, qdb::core::QdbError> {
    let mut decoder = RdbDecoder::new(bytes, databases);
    let mut entries = Vec::new();
    while let Some(entry) = decoder.next_entry().await? {
        entries.push(entry);
    }
    Ok(entries)
}

#[tokio::test]
async fn test_rdb_header_and_entries() {
    let objects = sample_objects();
    let bytes = encode(&objects);
    assert!(bytes.starts_with(b"QDBRDB0001"));

    let entries = decode_all(&bytes, 16).await.unwrap();
    assert_eq!(entries.len(), 3);
    for (entry, object) in entries.iter().zip(&objects) {
        assert_eq!(entry.db, object.db);
        assert_eq!(entry.key, object.key);
        assert_eq!(entry.value, object.value.data);
        assert_eq!(entry.expire_at, object.value.expire_at);
    }
}

#[tokio::test]
async fn test_rdb_decodes_from_fragmented_reads() {
    let objects = sample_objects();
    let bytes = encode(&objects);
    let mut builder = tokio_test::io::Builder::new();
    for chunk in bytes.chunks(7) {
        builder.read(chunk);
    }

    let mut decoder = RdbDecoder::new(builder.build(), 16);
    let mut keys = Vec::new();
    while let Some(entry) = decoder.next_entry().await.unwrap() {
        keys.push(entry.key);
    }
    assert!(decoder.is_finished());
    assert_eq!(keys, vec![b("str"), b("list"), b("hash")]);
}

#[tokio::test]
async fn test_rdb_skips_expired_objects() {
    let objects = vec![SnapshotObject {
        db: 0,
        key: b("gone"),
        value: StoredValue::with_expiry(DataValue::String(b("x")), Some(1)),
    }];
    let entries = decode_all(&encode(&objects), 16).await.unwrap();
    assert!(entries.is_empty());
}

#[tokio::test]
async fn test_rdb_detects_checksum_mismatch() {
    let mut bytes = encode(&sample_objects());
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    assert!(decode_all(&bytes, 16).await.is_err());
}

#[tokio::test]
async fn test_rdb_rejects_bad_magic() {
    let mut bytes = encode(&sample_objects());
    bytes[0] = b'X';
    assert!(decode_all(&bytes, 16).await.is_err());
}

#[tokio::test]
async fn test_rdb_rejects_database_out_of_range() {
    let bytes = encode(&sample_objects());
    // The sample writes into database 3.
    assert!(decode_all(&bytes, 2).await.is_err());
}

#[tokio::test]
async fn test_rdb_truncated_stream_fails_to_load() {
    let bytes = encode(&sample_objects());
    let truncated = bytes[..bytes.len() - 12].to_vec();
    let store = Arc::new(Store::new(16));
    let result = load_parallel(store, std::io::Cursor::new(truncated), 2).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_rdb_large_snapshot_spans_encoding_threads() {
    let objects: Vec<SnapshotObject> = (0..5000)
        .map(|i| SnapshotObject {
            db: (i % 4) as u32,
            key: b(&format!("key:{i}")),
            value: StoredValue::new(DataValue::String(b(&format!("value:{i}")))),
        })
        .collect();
    let bytes = encode(&objects);

    let store = Arc::new(Store::new(4));
    let loaded = load_parallel(store.clone(), std::io::Cursor::new(bytes), 4)
        .await
        .unwrap();
    assert_eq!(loaded, 5000);
    let total: usize = (0..4).map(|db| store.dbsize(db).unwrap()).sum();
    assert_eq!(total, 5000);
}

#[tokio::test]
async fn test_dump_and_load_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("dump.rdb");
    let path_str = path.to_string_lossy().into_owned();

    let source = Store::new(16);
    for object in sample_objects() {
        let ttl = object.value.expire_at.map(|at| at - unix_millis());
        source
            .restore(object.db as usize, object.key, object.value.data, ttl)
            .unwrap();
    }
    let (snapshot, ()) = source.new_snapshot(|| ());
    let size = dump_snapshot(snapshot, path.clone()).await.unwrap();
    assert_eq!(std::fs::metadata(&path).unwrap().len(), size);

    let target = Arc::new(Store::new(16));
    let loaded = load_dump_file(target.clone(), &path_str).await.unwrap();
    assert_eq!(loaded, Some(3));

    let now = unix_millis();
    let value = target
        .read(0, |ks| ks.get(b"str", now).map(|v| v.data.clone()))
        .unwrap();
    assert_eq!(value, Some(DataValue::String(b("hello"))));
    let expiry = target
        .read(3, |ks| ks.get(b"hash", now).and_then(|v| v.expire_at))
        .unwrap();
    assert!(expiry.is_some_and(|at| at > now));
}

#[tokio::test]
async fn test_load_missing_dump_file_is_none() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("absent.rdb");
    let store = Arc::new(Store::new(1));
    let loaded = load_dump_file(store, &path.to_string_lossy()).await.unwrap();
    assert_eq!(loaded, None);
}

#[test]
fn test_snapshot_is_isolated_from_later_writes() {
    let store = Store::new(2);
    store
        .restore(0, b("counter"), DataValue::String(b("1")), None)
        .unwrap();
    store
        .restore(1, b("list"), DataValue::List([b("a")].into_iter().collect()), None)
        .unwrap();

    let (mut snapshot, ()) = store.new_snapshot(|| ());
    assert_eq!(snapshot.total(), 2);

    let now = unix_millis();
    store
        .update(0, |ks, _log| {
            if let Some(value) = ks.get_mut(b"counter", now) {
                value.data = DataValue::String(b("2"));
            }
            ks.insert(b("late"), StoredValue::new(DataValue::String(b("x"))));
            Ok(())
        })
        .unwrap();
    store.update(1, |ks, _log| Ok(ks.purge(b"list"))).unwrap();

    let (objects, more) = snapshot.load_obj_cron(std::time::Duration::from_secs(1), 1, 10);
    assert!(!more);
    assert_eq!(snapshot.remaining(), 0);
    assert_eq!(objects.len(), 2);
    let counter = objects.iter().find(|o| o.key == b("counter")).unwrap();
    assert_eq!(counter.db, 0);
    assert_eq!(counter.value.data, DataValue::String(b("1")));
    assert!(objects.iter().any(|o| o.db == 1 && o.key == b("list")));

    let live = store
        .read(0, |ks| ks.get(b"counter", now).map(|v| v.data.clone()))
        .unwrap();
    assert_eq!(live, Some(DataValue::String(b("2"))));
}

#[test]
fn test_snapshot_hands_out_batches_across_databases() {
    let store = Store::new(3);
    for db in 0..3 {
        for i in 0..5 {
            store
                .restore(db, b(&format!("k{i}")), DataValue::String(b("v")), None)
                .unwrap();
        }
    }
    let (mut snapshot, ()) = store.new_snapshot(|| ());
    let mut seen = Vec::new();
    loop {
        let (objects, more) = snapshot.load_obj_cron(std::time::Duration::from_secs(1), 2, 2);
        assert!(objects.len() <= 4);
        seen.extend(objects.into_iter().map(|o| o.db));
        if !more {
            break;
        }
    }
    assert_eq!(seen.len(), 15);
    let mut sorted = seen.clone();
    sorted.sort();
    assert_eq!(seen, sorted);
}
