// tests/property/replay_test.rs

//! Property-based tests for replication consistency: replaying the stream a master
//! produced on a fresh server yields the same data.

use crate::test_helpers::TestContext;
use bytes::BytesMut;
use proptest::prelude::*;
use qdb::connection::SessionState;
use qdb::core::RespValue;
use qdb::core::handler::command_router::Router;
use qdb::core::protocol::ReplStreamCodec;
use tokio_util::codec::Decoder;

#[derive(Debug, Clone)]
enum Op {
    Select(u8),
    Set(String, String),
    Del(String),
    IncrBy(String, i64),
    HSet(String, String, String),
    RPush(String, String),
    Expire(String, u16),
}

fn key() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["a", "b", "c", "d", "e"]).prop_map(str::to_string)
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..4).prop_map(Op::Select),
        (key(), "[a-z0-9]{0,8}").prop_map(|(k, v)| Op::Set(k, v)),
        key().prop_map(Op::Del),
        (key(), -100i64..100).prop_map(|(k, d)| Op::IncrBy(k, d)),
        (key(), "[a-z]{1,4}", "[a-z0-9]{0,8}").prop_map(|(k, f, v)| Op::HSet(k, f, v)),
        (key(), "[a-z0-9]{0,8}").prop_map(|(k, v)| Op::RPush(k, v)),
        (key(), 100u16..1000).prop_map(|(k, s)| Op::Expire(k, s)),
    ]
}

impl Op {
    fn parts(&self) -> Vec<String> {
        let owned = |parts: &[&str]| -> Vec<String> { parts.iter().map(|p| p.to_string()).collect() };
        match self {
            Op::Select(db) => owned(&["SELECT", &db.to_string()]),
            Op::Set(k, v) => owned(&["SET", k, v]),
            Op::Del(k) => owned(&["DEL", k]),
            Op::IncrBy(k, d) => owned(&["INCRBY", k, &d.to_string()]),
            Op::HSet(k, f, v) => owned(&["HSET", k, f, v]),
            Op::RPush(k, v) => owned(&["RPUSH", k, v]),
            Op::Expire(k, s) => owned(&["EXPIRE", k, &s.to_string()]),
        }
    }
}

/// Renders every key of every database through the read commands.
async fn dump(ctx: &mut TestContext) -> Vec<(usize, String, RespValue)> {
    let mut out = Vec::new();
    for db in 0..4 {
        ctx.exec(&["SELECT", &db.to_string()]).await.unwrap();
        for key in ["a", "b", "c", "d", "e"] {
            let value = match ctx.exec(&["GET", key]).await {
                Ok(value) => value,
                Err(_) => match ctx.exec(&["HGETALL", key]).await {
                    Ok(value) => value,
                    Err(_) => ctx.exec(&["LRANGE", key, "0", "-1"]).await.unwrap(),
                },
            };
            let ttl = ctx.exec(&["TTL", key]).await.unwrap();
            let has_ttl = matches!(ttl, RespValue::Integer(t) if t > 0);
            out.push((db, format!("{key}:{has_ttl}"), value));
        }
    }
    out
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 40,
        max_shrink_iters: 200,
        ..ProptestConfig::default()
    })]

    #[test]
    fn test_replayed_stream_reproduces_master_data(ops in prop::collection::vec(op(), 1..80)) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let mut master = TestContext::new().await;
            let from = master.state.master.snapshot_offset().unwrap();
            for op in &ops {
                let parts = op.parts();
                let parts: Vec<&str> = parts.iter().map(String::as_str).collect();
                // Type errors are part of the workload; they must not reach the stream.
                let _ = master.exec(&parts).await;
            }

            let mut buf = vec![0u8; 1024 * 1024];
            let n = master.state.master.read_window(from, &mut buf).unwrap();
            let mut src = BytesMut::from(&buf[..n]);

            let mut slave = TestContext::new().await;
            let mut link = SessionState::master_link(0);
            while let Some((frame, _)) = ReplStreamCodec.decode(&mut src).unwrap() {
                let mut router = Router::new(slave.state.clone(), &mut link);
                router.route(frame.into_args().unwrap()).await.unwrap();
            }
            assert!(src.is_empty());

            assert_eq!(dump(&mut master).await, dump(&mut slave).await);
        });
    }
}
