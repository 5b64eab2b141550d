use std::net::SocketAddr;

use axum::{
    extract::ws::{Message as WsMessage, WebSocketUpgrade},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde_json::json;
use tokio::net::TcpListener;

use super::*;
use crate::supervisor::{ConnectionSupervisor, SupervisorConfig};

async fn machine_code(body: String) -> String {
    match body.as_str() {
        "T" => "Tool 1 is selected.\n".into(),
        r#"M409 K"state.status""# => {
            json!({"key": "state.status", "flags": "", "result": "idle"}).to_string()
        }
        r#"M409 K"tools""# => json!({
            "key": "tools",
            "flags": "",
            "result": [{"offsets": [0.0, 0.0, -50.0]}, {"offsets": [1.0, 2.0, -75.0]}]
        })
        .to_string(),
        r#"M409 K"move.axes""# => json!({
            "key": "move.axes",
            "flags": "",
            "result": [
                {"min": 0.0, "max": 300.0},
                {"min": 0.0, "max": 300.0},
                {"min": 0.0, "max": 400.0},
                {"min": -10.0, "max": 200.0}
            ]
        })
        .to_string(),
        code if code.starts_with("G0") => "Error: G0: insufficient axes homed\n".into(),
        _ => String::new(),
    }
}

async fn machine_feed(upgrade: WebSocketUpgrade) -> impl IntoResponse {
    upgrade.on_upgrade(|mut socket| async move {
        let document = json!({"state": {"status": "idle", "currentTool": -1}});
        if socket.send(WsMessage::Text(document.to_string())).await.is_err() {
            return;
        }
        let mut acknowledged = 0;
        while let Some(Ok(message)) = socket.recv().await {
            let WsMessage::Text(text) = message else {
                continue;
            };
            if text != WS_ACKNOWLEDGE {
                continue;
            }
            acknowledged += 1;
            if acknowledged > 1 {
                let _ = socket.send(WsMessage::Close(None)).await;
                break;
            }
            let _ = socket.send(WsMessage::Text(WS_PING.into())).await;
            match socket.recv().await {
                Some(Ok(WsMessage::Text(reply))) if reply == WS_PONG => {}
                _ => return,
            }
            let patch = json!({"state": {"status": "busy"}});
            let _ = socket.send(WsMessage::Text(patch.to_string())).await;
        }
    })
}

async fn serve() -> SocketAddr {
    let router = Router::new()
        .route("/machine/code", post(machine_code))
        .route("/machine", get(machine_feed));
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let address = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("serve");
    });
    address
}

fn connector(address: SocketAddr) -> HttpConnector {
    HttpConnector::new(&address.to_string(), Duration::from_secs(1)).expect("connector")
}

#[test]
fn urls_derive_from_the_address() {
    let connector = HttpConnector::new("jubilee.local", Duration::from_secs(1)).expect("connector");
    assert_eq!(
        connector.code_url().expect("code url").as_str(),
        "http://jubilee.local/machine/code"
    );
    assert_eq!(
        connector.feed_url().expect("feed url").as_str(),
        "ws://jubilee.local/machine"
    );

    let connector =
        HttpConnector::new("https://10.0.0.4:8443", Duration::from_secs(1)).expect("connector");
    assert_eq!(
        connector.feed_url().expect("feed url").as_str(),
        "wss://10.0.0.4:8443/machine"
    );
}

#[tokio::test]
async fn codes_are_posted_and_errors_detected() {
    let address = serve().await;
    let channel = connector(address).open_commands().await.expect("open");

    assert_eq!(channel.send("M400").await.expect("send"), "");
    let err = channel.send("G0 X1").await.expect_err("firmware error");
    match err {
        DuetError::RemoteCommand { command, reply } => {
            assert_eq!(command, "G0 X1");
            assert_eq!(reply, "Error: G0: insufficient axes homed");
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn feed_answers_pings_and_stops_on_close() {
    let address = serve().await;
    let mut feed = connector(address).open_feed().await.expect("open feed");

    let document = feed.subscribe().await.expect("subscribe");
    assert_eq!(document["state"]["status"], json!("idle"));

    let patch = feed.next_patch().await.expect("patch");
    assert_eq!(patch, json!({"state": {"status": "busy"}}));

    let closed = feed.next_patch().await.expect_err("server closed");
    assert!(matches!(closed, DuetError::Frame(FrameError::Closed)));
    feed.close().await;
}

#[tokio::test]
async fn connect_primes_machine_properties() {
    let address = serve().await;
    let mut supervisor = ConnectionSupervisor::new(
        Arc::new(connector(address)),
        SupervisorConfig {
            poll_interval: Duration::from_millis(10),
            ..SupervisorConfig::default()
        },
    );
    supervisor.connect().await.expect("connect");

    assert_eq!(supervisor.deployment(), Deployment::Http);
    assert_eq!(supervisor.active_tool_index().await.expect("tool"), 1);
    let offsets = supervisor.tool_offsets().await.expect("offsets");
    assert_eq!(offsets[1].x, 1.0);
    assert_eq!(offsets[1].z, -75.0);
    assert_eq!(supervisor.axis_limits().await.expect("limits")[3].min, -10.0);
    supervisor.disconnect().await;
}

#[tokio::test]
async fn unreachable_server_fails_to_connect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let address = listener.local_addr().expect("local addr");
    drop(listener);

    let err = connector(address).open_commands().await.expect_err("nothing listening");
    assert!(matches!(err, DuetError::Connection(_)));
}
