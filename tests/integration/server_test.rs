// tests/integration/server_test.rs

//! Client-facing behaviour of a listening server.

use super::test_helpers::{TestServer, text, wait_until};
use qdb::core::protocol::RespFrame;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

#[tokio::test]
async fn test_basic_commands_over_tcp() {
    let server = TestServer::start().await;
    let mut client = server.client().await;

    assert_eq!(client.send(&["PING"]).await, RespFrame::SimpleString("PONG".into()));
    assert_eq!(client.send(&["SET", "k", "v"]).await, RespFrame::SimpleString("OK".into()));
    assert_eq!(client.send(&["GET", "k"]).await, RespFrame::BulkString("v".into()));
    assert_eq!(client.send(&["GET", "nope"]).await, RespFrame::Null);
    assert_eq!(client.send(&["INCR", "n"]).await, RespFrame::Integer(1));
}

#[tokio::test]
async fn test_command_errors_keep_the_connection() {
    let server = TestServer::start().await;
    let mut client = server.client().await;

    let reply = client.send(&["NOSUCHCMD", "x"]).await;
    assert!(matches!(reply, RespFrame::Error(ref e) if e.starts_with("ERR unknown command")));
    let reply = client.send(&["GET"]).await;
    assert!(matches!(reply, RespFrame::Error(ref e) if e.contains("wrong number of arguments")));
    assert_eq!(client.send(&["PING"]).await, RespFrame::SimpleString("PONG".into()));
}

#[tokio::test]
async fn test_protocol_error_closes_the_connection() {
    let server = TestServer::start().await;
    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    stream.write_all(b"*1\r\n$abc\r\n").await.unwrap();

    let mut reply = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut reply))
        .await
        .unwrap()
        .unwrap();
    assert!(reply.starts_with(b"-"));
}

#[tokio::test]
async fn test_auth_required_over_tcp() {
    let server = TestServer::start_with(|c| c.auth = "pw".into()).await;
    let mut client = server.client().await;
    let reply = client.send(&["GET", "k"]).await;
    assert!(text(&reply).starts_with("NOAUTH"));
    assert_eq!(client.send(&["AUTH", "pw"]).await, RespFrame::SimpleString("OK".into()));
    assert_eq!(client.send(&["GET", "k"]).await, RespFrame::Null);
}

#[tokio::test]
async fn test_bgsave_and_shutdown_save() {
    let server = TestServer::start().await;
    let mut client = server.client().await;
    client.send(&["SET", "k", "v"]).await;

    let reply = client.send(&["BGSAVE"]).await;
    assert_eq!(text(&reply), "Background saving started");
    let dump = server.state.config.dump_filepath.clone();
    assert!(wait_until(Duration::from_secs(5), || Path::new(&dump).exists()).await);

    std::fs::remove_file(&dump).unwrap();
    client.send(&["SHUTDOWN"]).await;
    assert!(wait_until(Duration::from_secs(10), || server.is_finished()).await);
    assert!(Path::new(&dump).exists());
}

#[tokio::test]
async fn test_shutdown_nosave_skips_the_dump() {
    let server = TestServer::start().await;
    let mut client = server.client().await;
    client.send(&["SET", "k", "v"]).await;
    client.send(&["SHUTDOWN", "NOSAVE"]).await;

    assert!(wait_until(Duration::from_secs(10), || server.is_finished()).await);
    assert!(!Path::new(&server.state.config.dump_filepath).exists());
}

#[tokio::test]
async fn test_dump_is_loaded_on_startup() {
    let first = TestServer::start().await;
    let mut client = first.client().await;
    client.send(&["SELECT", "4"]).await;
    client.send(&["RPUSH", "l", "a", "b"]).await;
    client.send(&["SHUTDOWN"]).await;
    assert!(wait_until(Duration::from_secs(10), || first.is_finished()).await);

    let dump = first.state.config.dump_filepath.clone();
    let second = TestServer::start_with(|c| c.dump_filepath = dump).await;
    let mut client = second.client().await;
    client.send(&["SELECT", "4"]).await;
    let reply = client.send(&["LRANGE", "l", "0", "-1"]).await;
    assert_eq!(
        reply,
        RespFrame::Array(vec![
            RespFrame::BulkString("a".into()),
            RespFrame::BulkString("b".into()),
        ])
    );
}
