//! Relay channel contracts against a local WebSocket server: credential
//! handshake, reconnect behavior, and the signaling announcement dance.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::time::sleep;
use tokio_tungstenite::{WebSocketStream, accept_async, tungstenite::Message};

use phonebell::config::{Config, PhoneSide};
use phonebell::protocol::{ControlCommand, ControlEvent, SignalMessage};
use phonebell::socket::{ControlSocket, SignalingSocket};

fn config_for(addr: std::net::SocketAddr) -> Config {
    Config {
        side: PhoneSide::Inside,
        relay_url: format!("ws://{addr}/phonebell"),
        api_key: "secret-token".to_string(),
        reconnect_delay: Duration::from_millis(50),
    }
}

async fn accept(listener: &TcpListener) -> WebSocketStream<TcpStream> {
    let (stream, _) = listener.accept().await.expect("tcp accept");
    accept_async(stream).await.expect("websocket handshake")
}

/// Next text frame, skipping control frames.
async fn next_text(ws: &mut WebSocketStream<TcpStream>) -> String {
    loop {
        match ws
            .next()
            .await
            .expect("client stays connected")
            .expect("readable frame")
        {
            Message::Text(text) => return text.to_string(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

#[tokio::test]
async fn control_channel_credential_first_and_no_replay() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = config_for(listener.local_addr().unwrap());
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let (socket, events, mut commands) = ControlSocket::new(Arc::new(config), shutdown_rx);
    tokio::spawn(socket.run());

    // The credential is the first payload of the session.
    let mut ws = accept(&listener).await;
    assert_eq!(next_text(&mut ws).await, "secret-token");
    drop(ws);

    // Queued while the channel is down; must not be replayed.
    events
        .send(ControlEvent::Dial {
            number: "4225".to_string(),
        })
        .await
        .unwrap();

    // The fresh connection repeats the handshake.
    let mut ws = accept(&listener).await;
    assert_eq!(next_text(&mut ws).await, "secret-token");

    // Let the socket discard the stale queue before sending live traffic.
    sleep(Duration::from_millis(100)).await;
    events.send(ControlEvent::Hook { state: false }).await.unwrap();
    assert_eq!(next_text(&mut ws).await, r#"{"type":"Hook","state":false}"#);

    // Commands flow inbound on the same session.
    ws.send(Message::Text(r#"{"type":"Ring","state":true}"#.into()))
        .await
        .unwrap();
    assert_eq!(
        commands.recv().await,
        Some(ControlCommand::Ring { state: true })
    );
}

#[tokio::test]
async fn signaling_channel_answers_probe_then_joins() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = config_for(listener.local_addr().unwrap());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (socket, _signal_tx, mut inbound) =
        SignalingSocket::new(Arc::new(config), "client-1".to_string(), shutdown_rx);
    tokio::spawn(socket.run());

    // Nothing is sent until the readiness probe is answered.
    let mut ws = accept(&listener).await;
    ws.send(Message::Ping(Bytes::from_static(b"ready")))
        .await
        .unwrap();
    match ws.next().await.unwrap().unwrap() {
        Message::Pong(data) => assert_eq!(&data[..], b"ready"),
        other => panic!("expected pong before anything else, got {other:?}"),
    }
    assert_eq!(
        next_text(&mut ws).await,
        r#"{"type":"Join","from":"client-1"}"#
    );

    // A relay restart gets the full probe-then-announce sequence again.
    drop(ws);
    let mut ws = accept(&listener).await;
    ws.send(Message::Ping(Bytes::from_static(b"ready")))
        .await
        .unwrap();
    assert_eq!(
        next_text(&mut ws).await,
        r#"{"type":"Join","from":"client-1"}"#
    );

    // Inbound messages reach the peer side.
    ws.send(Message::Text(r#"{"type":"Join","from":"other"}"#.into()))
        .await
        .unwrap();
    assert_eq!(
        inbound.recv().await,
        Some(SignalMessage::Join {
            from: "other".to_string()
        })
    );

    // Shutdown says goodbye before the connection drops.
    shutdown_tx.send(true).unwrap();
    assert_eq!(
        next_text(&mut ws).await,
        r#"{"type":"Leave","from":"client-1"}"#
    );
}
