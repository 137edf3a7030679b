// tests/integration/replication_test.rs

//! Master and slave servers talking over loopback, plus a hand-driven slave that
//! speaks the sync protocol directly.

use super::test_helpers::{TestServer, text, wait_until};
use bytes::Bytes;
use futures::StreamExt;
use qdb::core::persistence::RdbEncoder;
use qdb::core::protocol::{ReplStreamCodec, RespFrame, RespFrameCodec};
use qdb::core::replication::LinkState;
use qdb::core::storage::{DataValue, SnapshotObject, StoredValue, unix_millis};
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio_util::codec::FramedRead;

const SYNC_WAIT: Duration = Duration::from_secs(15);

fn ok() -> RespFrame {
    RespFrame::SimpleString("OK".into())
}

fn has_key(server: &TestServer, db: usize, key: &str) -> bool {
    server
        .state
        .store
        .read(db, |ks| ks.contains(key.as_bytes(), unix_millis()))
        .unwrap_or(false)
}

async fn follow(slave: &TestServer, master: &TestServer) {
    let mut client = slave.client().await;
    let port = master.addr.port().to_string();
    assert_eq!(client.send(&["SLAVEOF", "127.0.0.1", &port]).await, ok());
}

/// A slave driven by hand.
struct RawSlave {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl RawSlave {
    async fn connect(server: &TestServer) -> Self {
        let stream = TcpStream::connect(server.addr).await.unwrap();
        let (reader, writer) = stream.into_split();
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }

    async fn send(&mut self, parts: &[&str]) {
        let frame = RespFrame::command(parts.iter().map(|p| Bytes::copy_from_slice(p.as_bytes())));
        self.writer
            .write_all(&frame.encode_to_vec().unwrap())
            .await
            .unwrap();
    }

    async fn line(&mut self) -> String {
        let mut line = String::new();
        tokio::time::timeout(SYNC_WAIT, self.reader.read_line(&mut line))
            .await
            .unwrap()
            .unwrap();
        line.trim_end().to_string()
    }

    /// Reads the `$size` blob that carries the RDB.
    async fn rdb(&mut self) -> Vec<u8> {
        let header = self.line().await;
        let size: usize = header.strip_prefix('$').unwrap().parse().unwrap();
        let mut payload = vec![0u8; size + 2];
        tokio::time::timeout(SYNC_WAIT, self.reader.read_exact(&mut payload))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&payload[size..], b"\r\n");
        payload.truncate(size);
        payload
    }

    /// Issues `PSYNC` and returns the reply line.
    async fn psync(&mut self, runid: &str, offset: i64) -> String {
        self.send(&["PSYNC", runid, &offset.to_string()]).await;
        self.line().await
    }

    /// Collects stream commands until one named `until` arrives, skipping heartbeats
    /// unless `until` is `PING`.
    async fn commands_until(self, until: &str) -> Vec<Vec<String>> {
        let mut frames = FramedRead::new(self.reader, ReplStreamCodec);
        let mut seen = Vec::new();
        loop {
            let (frame, _) = tokio::time::timeout(SYNC_WAIT, frames.next())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            let args: Vec<String> = frame
                .into_args()
                .unwrap()
                .iter()
                .map(|a| String::from_utf8_lossy(a).into_owned())
                .collect();
            if args[0] == "PING" && until != "PING" {
                continue;
            }
            let done = args[0] == until;
            seen.push(args);
            if done {
                return seen;
            }
        }
    }
}

fn parse_fullresync(line: &str) -> (String, i64) {
    let rest = line.strip_prefix("+FULLRESYNC ").unwrap();
    let (runid, offset) = rest.split_once(' ').unwrap();
    (runid.to_string(), offset.parse().unwrap())
}

#[tokio::test]
async fn test_full_sync_then_stream() {
    let master = TestServer::start().await;
    let mut writer = master.client().await;
    writer.send(&["SET", "before", "1"]).await;
    writer.send(&["SELECT", "3"]).await;
    writer.send(&["HSET", "h", "f", "v"]).await;

    let slave = TestServer::start().await;
    follow(&slave, &master).await;

    assert!(wait_until(SYNC_WAIT, || has_key(&slave, 0, "before") && has_key(&slave, 3, "h")).await);

    writer.send(&["RPUSH", "list", "a", "b"]).await;
    writer.send(&["SELECT", "0"]).await;
    writer.send(&["INCRBY", "counter", "7"]).await;
    writer.send(&["DEL", "before"]).await;
    assert!(
        wait_until(SYNC_WAIT, || has_key(&slave, 3, "list")
            && has_key(&slave, 0, "counter")
            && !has_key(&slave, 0, "before"))
        .await
    );

    let mut reader = slave.client().await;
    assert_eq!(reader.send(&["GET", "counter"]).await, RespFrame::BulkString("7".into()));
    reader.send(&["SELECT", "3"]).await;
    assert_eq!(
        reader.send(&["LRANGE", "list", "0", "-1"]).await,
        RespFrame::Array(vec![
            RespFrame::BulkString("a".into()),
            RespFrame::BulkString("b".into()),
        ])
    );
}

#[tokio::test]
async fn test_slave_rejects_client_writes() {
    let master = TestServer::start().await;
    let slave = TestServer::start().await;
    follow(&slave, &master).await;

    let mut client = slave.client().await;
    let reply = client.send(&["SET", "k", "v"]).await;
    assert!(text(&reply).starts_with("READONLY"));
    assert_eq!(client.send(&["GET", "k"]).await, RespFrame::Null);

    assert_eq!(client.send(&["SLAVEOF", "NO", "ONE"]).await, ok());
    assert_eq!(client.send(&["SET", "k", "v"]).await, ok());
}

#[tokio::test]
async fn test_offsets_converge_and_roles_are_reported() {
    let master = TestServer::start().await;
    let slave = TestServer::start().await;
    follow(&slave, &master).await;

    let mut writer = master.client().await;
    for i in 0..50 {
        writer.send(&["SET", &format!("k{i}"), "v"]).await;
    }
    assert!(wait_until(SYNC_WAIT, || has_key(&slave, 0, "k49")).await);
    assert!(wait_until(SYNC_WAIT, || slave.state.slave.link_state() == LinkState::Connected).await);

    // Heartbeats keep moving the master offset, so compare against a window.
    assert!(
        wait_until(SYNC_WAIT, || {
            let master_offset = master.state.master.master_offset() as i64;
            let slave_offset = slave.state.slave.sync_offset();
            slave_offset > 0 && master_offset - slave_offset <= 64
        })
        .await
    );
    assert_eq!(slave.state.slave.master_runid(), master.state.master.run_id());

    let info = text(&writer.send(&["INFO", "replication"]).await);
    assert!(info.contains("role:master"));
    assert!(info.contains("connected_slaves:1"));

    let mut client = slave.client().await;
    let info = text(&client.send(&["INFO", "replication"]).await);
    assert!(info.contains("role:slave"));
    assert!(info.contains("master_link_status:up"));
    assert!(info.contains(&format!("master_port:{}", master.addr.port())));

    match client.send(&["ROLE"]).await {
        RespFrame::Array(items) => {
            assert_eq!(items[0], RespFrame::BulkString("slave".into()));
            assert_eq!(items[2], RespFrame::Integer(i64::from(master.addr.port())));
        }
        other => panic!("unexpected ROLE reply {other:?}"),
    }
}

#[tokio::test]
async fn test_full_sync_clears_stale_slave_data() {
    let master = TestServer::start().await;
    master.client().await.send(&["SET", "fresh", "1"]).await;

    let slave = TestServer::start().await;
    slave.client().await.send(&["SET", "stale", "1"]).await;
    follow(&slave, &master).await;

    assert!(wait_until(SYNC_WAIT, || has_key(&slave, 0, "fresh")).await);
    assert!(!has_key(&slave, 0, "stale"));
}

#[tokio::test]
async fn test_slave_reconnects_after_master_kills_link() {
    let master = TestServer::start().await;
    let slave = TestServer::start().await;
    follow(&slave, &master).await;
    assert!(wait_until(SYNC_WAIT, || slave.state.slave.link_state() == LinkState::Connected).await);
    let full_syncs = master.state.master.sync_full();

    master.state.master.close();
    master.client().await.send(&["SET", "after", "1"]).await;
    assert!(wait_until(SYNC_WAIT, || has_key(&slave, 0, "after")).await);
    assert!(master.state.master.sync_full() > full_syncs);
}

#[tokio::test]
async fn test_psync_continue_after_reconnect() {
    let master = TestServer::start().await;
    let mut first = RawSlave::connect(&master).await;
    let (runid, offset) = parse_fullresync(&first.psync("?", -1).await);
    assert_eq!(runid, master.state.master.run_id());
    first.rdb().await;
    drop(first);

    let mut writer = master.client().await;
    writer.send(&["SET", "k", "v"]).await;
    writer.send(&["SELECT", "2"]).await;
    writer.send(&["INCR", "n"]).await;

    let mut second = RawSlave::connect(&master).await;
    assert_eq!(second.psync(&runid, offset).await, "+CONTINUE");
    let seen = second.commands_until("INCR").await;
    assert_eq!(
        seen,
        vec![
            vec!["SELECT", "0"],
            vec!["SET", "k", "v"],
            vec!["SELECT", "2"],
            vec!["INCR", "n"],
        ]
    );
    assert!(wait_until(SYNC_WAIT, || master.state.master.sync_partial_ok() >= 1).await);
}

#[tokio::test]
async fn test_psync_with_unknown_runid_falls_back_to_full() {
    let master = TestServer::start().await;
    master.client().await.send(&["SET", "k", "v"]).await;

    let mut slave = RawSlave::connect(&master).await;
    let reply = slave.psync(&"0".repeat(40), 5).await;
    let (runid, _) = parse_fullresync(&reply);
    assert_eq!(runid, master.state.master.run_id());
    let rdb = slave.rdb().await;
    assert!(rdb.starts_with(b"QDBRDB"));
    assert_eq!(master.state.master.sync_partial_err(), 1);
    assert_eq!(master.state.master.sync_partial_ok(), 0);
}

#[tokio::test]
async fn test_psync_offset_outside_backlog_falls_back_to_full() {
    let master = TestServer::start().await;
    let mut first = RawSlave::connect(&master).await;
    let (runid, offset) = parse_fullresync(&first.psync("?", -1).await);
    first.rdb().await;
    drop(first);
    assert_eq!(master.state.master.sync_partial_err(), 0);

    let mut second = RawSlave::connect(&master).await;
    let reply = second.psync(&runid, offset + 1_000_000).await;
    assert!(reply.starts_with("+FULLRESYNC "));
    assert_eq!(master.state.master.sync_partial_err(), 1);
    assert_eq!(master.state.master.sync_full(), 2);
}

#[tokio::test]
async fn test_legacy_sync_sends_rdb_without_preamble() {
    let master = TestServer::start().await;
    let mut writer = master.client().await;
    writer.send(&["SET", "k", "v"]).await;

    let mut slave = RawSlave::connect(&master).await;
    slave.send(&["SYNC"]).await;
    let rdb = slave.rdb().await;
    assert!(rdb.starts_with(b"QDBRDB"));

    writer.send(&["DEL", "k"]).await;
    let seen = slave.commands_until("DEL").await;
    assert_eq!(seen.last().unwrap(), &vec!["DEL", "k"]);
}

#[tokio::test]
async fn test_slave_acks_are_recorded_on_master() {
    let master = TestServer::start().await;
    let mut slave = RawSlave::connect(&master).await;
    let (_, offset) = parse_fullresync(&slave.psync("?", -1).await);
    slave.rdb().await;

    slave.send(&["REPLCONF", "ACK", &(offset - 1).to_string()]).await;
    assert!(
        wait_until(SYNC_WAIT, || {
            master
                .state
                .master
                .report()
                .slaves
                .iter()
                .any(|s| s.ack_offset.load(Ordering::Relaxed) == (offset - 1) as u64)
        })
        .await
    );
}

#[tokio::test]
async fn test_heartbeat_pings_reach_raw_slave() {
    let master = TestServer::start().await;
    let mut slave = RawSlave::connect(&master).await;
    parse_fullresync(&slave.psync("?", -1).await);
    slave.rdb().await;

    let seen = slave.commands_until("PING").await;
    assert_eq!(seen.last().unwrap(), &vec!["PING"]);
}

#[tokio::test]
async fn test_heartbeats_advance_slave_ack_offset() {
    let master = TestServer::start().await;
    let slave = TestServer::start().await;
    follow(&slave, &master).await;
    assert!(wait_until(SYNC_WAIT, || slave.state.slave.link_state() == LinkState::Connected).await);

    let before = master.state.master.master_offset();
    // No client writes from here on: only heartbeats move the offset.
    assert!(wait_until(SYNC_WAIT, || master.state.master.master_offset() > before).await);
    let target = master.state.master.master_offset();
    assert!(
        wait_until(SYNC_WAIT, || {
            master.state.master.report().slaves.iter().any(|s| {
                s.ack_offset.load(Ordering::Relaxed) >= target
                    && s.ack_time.load(Ordering::Relaxed) > 0
            })
        })
        .await
    );
    assert!(slave.state.slave.sync_offset() >= target as i64);
}

/// Accepts one connection on a hand-driven master.
async fn accept_link(
    listener: &TcpListener,
) -> (FramedRead<OwnedReadHalf, RespFrameCodec>, OwnedWriteHalf) {
    let (stream, _) = tokio::time::timeout(SYNC_WAIT, listener.accept())
        .await
        .unwrap()
        .unwrap();
    let (reader, writer) = stream.into_split();
    (FramedRead::new(reader, RespFrameCodec), writer)
}

/// Answers the slave handshake and returns the `PSYNC` request that ends it.
async fn answer_handshake(
    frames: &mut FramedRead<OwnedReadHalf, RespFrameCodec>,
    writer: &mut OwnedWriteHalf,
) -> Vec<String> {
    loop {
        let frame = tokio::time::timeout(SYNC_WAIT, frames.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let args: Vec<String> = frame
            .into_args()
            .unwrap()
            .iter()
            .map(|a| String::from_utf8_lossy(a).into_owned())
            .collect();
        match args[0].to_ascii_uppercase().as_str() {
            "PING" => writer.write_all(b"+PONG\r\n").await.unwrap(),
            "REPLCONF" => writer.write_all(b"+OK\r\n").await.unwrap(),
            "PSYNC" => return args,
            other => panic!("unexpected handshake command {other}"),
        }
    }
}

fn dump_with_keys() -> Vec<u8> {
    let objects: Vec<SnapshotObject> = (0..200)
        .map(|i| SnapshotObject {
            db: 0,
            key: Bytes::from(format!("key{i}")),
            value: StoredValue::new(DataValue::String(Bytes::from(format!("value{i}")))),
        })
        .collect();
    let mut encoder = RdbEncoder::new(Vec::new()).unwrap();
    encoder.write_objects(&objects).unwrap();
    encoder.finish().unwrap().0
}

#[tokio::test]
async fn test_broken_rdb_transfer_is_retried_as_full_resync() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port().to_string();
    let runid = "f".repeat(40);
    let rdb = dump_with_keys();

    let master_runid = runid.clone();
    let fake_master = tokio::spawn(async move {
        let (mut frames, mut writer) = accept_link(&listener).await;
        let first = answer_handshake(&mut frames, &mut writer).await;
        let preamble = format!("+FULLRESYNC {master_runid} 100\r\n${}\r\n", rdb.len());
        writer.write_all(preamble.as_bytes()).await.unwrap();
        writer.write_all(&rdb[..rdb.len() / 2]).await.unwrap();
        drop(writer);
        drop(frames);

        let (mut frames, mut writer) = accept_link(&listener).await;
        let second = answer_handshake(&mut frames, &mut writer).await;
        let preamble = format!("+FULLRESYNC {master_runid} 100\r\n${}\r\n", rdb.len());
        writer.write_all(preamble.as_bytes()).await.unwrap();
        writer.write_all(&rdb).await.unwrap();
        writer.write_all(b"\r\n").await.unwrap();
        (first, second, frames, writer)
    });

    let slave = TestServer::start().await;
    let mut client = slave.client().await;
    assert_eq!(client.send(&["SLAVEOF", "127.0.0.1", &port]).await, ok());

    let (first, second, _frames, _writer) = tokio::time::timeout(SYNC_WAIT, fake_master)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first, vec!["PSYNC", "?", "-1"]);
    assert_eq!(second, vec!["PSYNC", "?", "-1"]);

    assert!(
        wait_until(SYNC_WAIT, || {
            slave.state.slave.link_state() == LinkState::Connected
                && slave.state.slave.sync_offset() == 99
        })
        .await
    );
    assert_eq!(slave.state.slave.master_runid(), runid);
    assert!(has_key(&slave, 0, "key199"));
}
