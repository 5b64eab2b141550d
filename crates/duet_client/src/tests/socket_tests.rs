use std::time::Duration;

use serde_json::json;
use tokio::{io::AsyncWriteExt, net::UnixListener, time::sleep};

use super::*;
use crate::transport::framing::JsonFrameReader;

fn connector(path: &Path) -> SocketConnector {
    SocketConnector::new(path, Duration::from_secs(1))
}

/// Accepts one connection, answers the init handshake and hands the halves
/// back after checking the client's init message with `check_init`.
async fn accept(
    listener: &UnixListener,
    check_init: impl FnOnce(Value),
) -> (JsonFrameReader<OwnedReadHalf>, OwnedWriteHalf) {
    let (stream, _) = listener.accept().await.expect("accept");
    let (read, mut write) = stream.into_split();
    let mut reader = JsonFrameReader::new(read);
    write
        .write_all(br#"{"version":11,"id":3}"#)
        .await
        .expect("write init");
    check_init(reader.next_frame().await.expect("client init"));
    write
        .write_all(br#"{"success":true}"#)
        .await
        .expect("write ack");
    (reader, write)
}

#[tokio::test]
async fn commands_round_trip_over_the_socket() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("dcs.sock");
    let listener = UnixListener::bind(&path).expect("bind");

    let server = tokio::spawn(async move {
        let (mut reader, mut write) = accept(&listener, |init| {
            assert_eq!(init, json!({"mode": "command", "version": 8}));
        })
        .await;
        let mut received = Vec::new();
        while let Ok(request) = reader.next_frame().await {
            assert_eq!(request["command"], json!("SimpleCode"));
            let code = request["code"].as_str().expect("code").to_string();
            let reply = if code.starts_with("G0") {
                json!({"success": true, "result": "Error: G0: insufficient axes homed\n"})
            } else {
                json!("ok\n")
            };
            write
                .write_all(reply.to_string().as_bytes())
                .await
                .expect("write reply");
            received.push(code);
        }
        received
    });

    let channel = connector(&path).open_commands().await.expect("open");
    assert_eq!(channel.send("M400").await.expect("send"), "ok\n");
    let err = channel.send("G0 X1").await.expect_err("firmware error");
    assert!(matches!(err, DuetError::RemoteCommand { .. }));
    channel.close().await;

    let received = server.await.expect("server");
    assert_eq!(received, vec!["M400", "G0 X1"]);
}

#[tokio::test]
async fn feed_subscribes_and_acknowledges_each_patch() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("dcs.sock");
    let listener = UnixListener::bind(&path).expect("bind");

    let server = tokio::spawn(async move {
        let (mut reader, mut write) = accept(&listener, |init| {
            assert_eq!(
                init,
                json!({"mode": "subscribe", "version": 8, "subscriptionMode": "Patch"})
            );
        })
        .await;
        write
            .write_all(br#"{"state":{"status":"idle","currentTool":-1}}"#)
            .await
            .expect("write model");

        let ack = reader.next_frame().await.expect("ack");
        assert_eq!(ack, json!({"command": "Acknowledge"}));
        write.write_all(br#"{"state":{"sta"#).await.expect("write half");
        sleep(Duration::from_millis(20)).await;
        write.write_all(br#"tus":"busy"}}"#).await.expect("write rest");

        let ack = reader.next_frame().await.expect("ack");
        assert_eq!(ack, json!({"command": "Acknowledge"}));
    });

    let mut feed = connector(&path).open_feed().await.expect("open feed");
    let document = feed.subscribe().await.expect("subscribe");
    assert_eq!(document["state"]["currentTool"], json!(-1));

    let patch = feed.next_patch().await.expect("patch");
    assert_eq!(patch, json!({"state": {"status": "busy"}}));

    let closed = feed.next_patch().await.expect_err("server hung up");
    assert!(matches!(closed, DuetError::Frame(FrameError::Closed)));
    feed.close().await;
    server.await.expect("server");
}

#[tokio::test]
async fn missing_socket_is_a_connection_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = connector(&dir.path().join("absent.sock"))
        .open_commands()
        .await
        .expect_err("no server");
    assert!(matches!(err, DuetError::Connection(_)));
}

#[tokio::test]
async fn late_replies_are_never_handed_to_the_next_command() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("dcs.sock");
    let listener = UnixListener::bind(&path).expect("bind");

    let server = tokio::spawn(async move {
        let (mut reader, mut write) = accept(&listener, |_| {}).await;
        let request = reader.next_frame().await.expect("request");
        assert_eq!(request["code"], json!("M114"));
        sleep(Duration::from_millis(100)).await;
        let _ = write.write_all(br#""reply to M114\n""#).await;
        let _ = write.write_all(br#""reply to T\n""#).await;
        reader.next_frame().await.is_err()
    });

    let channel = connector(&path).open_commands().await.expect("open");
    let err = channel
        .send_with_timeout("M114", Some(Duration::from_millis(20)))
        .await
        .expect_err("reply is late");
    assert!(matches!(err, DuetError::Transport(_)));

    let err = channel.send("T").await.expect_err("connection dropped");
    assert!(matches!(err, DuetError::NotConnected));
    assert!(server.await.expect("server"), "client should hang up");
}
